//! Builds the single executable test module: code, fixture, tests.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::detector::Framework;

static FLASK_APP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^app\s*(?::[^=\n]+)?=(?:[^=]|$)").unwrap());

const FLASK_FIXTURE: &str = r#"
# --- flask test client fixture ---
import pytest as _pytest_fixture_support


@_pytest_fixture_support.fixture
def client():
    app.config["TESTING"] = True
    with app.test_client() as test_client:
        yield test_client
"#;

const FLASK_FIXTURE_NO_APP: &str = r#"
# --- flask test client fixture ---
import pytest as _pytest_fixture_support


@_pytest_fixture_support.fixture
def client():
    from flask import Flask as _Flask

    test_app = _Flask(__name__)
    test_app.config["TESTING"] = True
    with test_app.test_client() as test_client:
        yield test_client
"#;

const FASTAPI_FIXTURE: &str = r#"
# --- fastapi test client fixture ---
import pytest as _pytest_fixture_support


@_pytest_fixture_support.fixture
def client():
    from fastapi.testclient import TestClient as _TestClient

    return _TestClient(app)
"#;

const FASTAPI_FIXTURE_NO_APP: &str = r#"
# --- fastapi test client fixture ---
import pytest as _pytest_fixture_support


@_pytest_fixture_support.fixture
def client():
    from fastapi import FastAPI as _FastAPI
    from fastapi.testclient import TestClient as _TestClient

    return _TestClient(_FastAPI())
"#;

const DJANGO_FIXTURE: &str = r#"
# --- django test client fixture ---
import pytest as _pytest_fixture_support


@_pytest_fixture_support.fixture
def client():
    import django
    from django.conf import settings

    if not settings.configured:
        settings.configure(
            DEBUG=True,
            SECRET_KEY="testloop",
            ALLOWED_HOSTS=["*"],
            ROOT_URLCONF=__name__,
            INSTALLED_APPS=[
                "django.contrib.contenttypes",
                "django.contrib.auth",
            ],
            DATABASES={
                "default": {
                    "ENGINE": "django.db.backends.sqlite3",
                    "NAME": ":memory:",
                }
            },
        )
        django.setup()
    from django.test import Client

    return Client()
"#;

/// True when the code binds a module-level `app`.
fn defines_app(code: &str) -> bool {
    FLASK_APP_RE.is_match(code)
}

/// The `client` fixture for a framework, or `None` when there is none.
pub fn fixture_for(framework: Framework, code: &str) -> Option<&'static str> {
    match framework {
        Framework::Flask if defines_app(code) => Some(FLASK_FIXTURE),
        Framework::Flask => Some(FLASK_FIXTURE_NO_APP),
        Framework::FastApi if defines_app(code) => Some(FASTAPI_FIXTURE),
        Framework::FastApi => Some(FASTAPI_FIXTURE_NO_APP),
        Framework::Django => Some(DJANGO_FIXTURE),
        Framework::None => None,
    }
}

/// Concatenate the code under test, the framework fixture and the tests.
///
/// The code is copied verbatim, so the result always contains it as a
/// substring.
pub fn combine(code: &str, tests: &str, framework: Framework) -> String {
    let fixture = fixture_for(framework, code);
    let mut out = String::with_capacity(
        code.len() + tests.len() + fixture.map(str::len).unwrap_or(0) + 128,
    );

    out.push_str(code);
    if !code.ends_with('\n') {
        out.push('\n');
    }
    out.push('\n');

    if let Some(fixture) = fixture {
        out.push_str(fixture);
        out.push('\n');
    }

    out.push_str("\n# --- generated tests ---\n");
    out.push_str(tests);
    if !tests.ends_with('\n') {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLASK_APP: &str = r#"from flask import Flask, jsonify

app = Flask(__name__)


@app.route("/")
def index():
    return jsonify(status="ok")
"#;

    #[test]
    fn test_code_is_kept_verbatim_and_first() {
        let code = "def add(a, b):\n    return a + b";
        let combined = combine(code, "def test_add():\n    assert add(1, 2) == 3\n", Framework::None);
        assert!(combined.starts_with(code));
        assert!(combined.contains("def test_add"));
        assert!(!combined.contains("def client"));
    }

    #[test]
    fn test_ordering_code_fixture_tests() {
        let combined = combine(FLASK_APP, "def test_index(client):\n    pass\n", Framework::Flask);
        let code_at = combined.find("app = Flask(__name__)").unwrap();
        let fixture_at = combined.find("def client():").unwrap();
        let tests_at = combined.find("def test_index").unwrap();
        assert!(code_at < fixture_at);
        assert!(fixture_at < tests_at);
    }

    #[test]
    fn test_flask_fixture_uses_existing_app() {
        let combined = combine(FLASK_APP, "def test_index(client): pass", Framework::Flask);
        assert!(combined.contains("app.test_client()"));
        assert!(!combined.contains("_Flask(__name__)"));
    }

    #[test]
    fn test_flask_fixture_without_app() {
        let code = "def add(a, b): return a+b\n";
        let combined = combine(code, "def test_add(): pass", Framework::Flask);
        assert!(combined.contains(code));
        assert!(combined.contains("test_app = _Flask(__name__)"));
    }

    #[test]
    fn test_fastapi_fixture() {
        let code = "from fastapi import FastAPI\n\napp = FastAPI()\n";
        let combined = combine(code, "def test_root(client): pass", Framework::FastApi);
        assert!(combined.contains("_TestClient(app)"));
    }

    #[test]
    fn test_fastapi_fixture_without_app() {
        let combined = combine("def f(): pass\n", "def test_f(): pass", Framework::FastApi);
        assert!(combined.contains("_TestClient(_FastAPI())"));
    }

    #[test]
    fn test_fixtures_import_framework_lazily() {
        let code = "def slugify(s):\n    return s.lower()\n";
        for framework in [Framework::Flask, Framework::FastApi, Framework::Django] {
            let combined = combine(code, "def test_slugify(): pass", framework);
            let eager_import = combined.lines().any(|line| {
                ["from flask", "import flask", "from fastapi", "import fastapi", "from django", "import django"]
                    .iter()
                    .any(|prefix| line.starts_with(prefix))
            });
            assert!(!eager_import, "{} fixture imports at module level", framework);
        }
    }

    #[test]
    fn test_django_fixture() {
        let combined = combine("def view(request): pass\n", "def test_view(): pass", Framework::Django);
        assert!(combined.contains("settings.configure("));
        assert!(combined.contains("return Client()"));
    }

    #[test]
    fn test_defines_app_variants() {
        assert!(defines_app("app = Flask(__name__)\n"));
        assert!(defines_app("app: FastAPI = FastAPI()\n"));
        assert!(!defines_app("    app = Flask(__name__)\n"));
        assert!(!defines_app("application = object()\n"));
        assert!(!defines_app("app == 1\n"));
    }

    #[test]
    fn test_combine_is_deterministic() {
        let a = combine(FLASK_APP, "def test_x(client): pass\n", Framework::Flask);
        let b = combine(FLASK_APP, "def test_x(client): pass\n", Framework::Flask);
        assert_eq!(a, b);
    }
}
