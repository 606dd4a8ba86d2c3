//! Function and framework detection for the code under test.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Upper bound on the number of functions handed to the generator.
pub const MAX_FUNCTIONS: usize = 20;

/// Words that look like calls in prose but never name a function under test.
const README_STOP_WORDS: &[&str] = &[
    "module", "key", "class", "object", "property", "input", "output", "returns", "return",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Flask,
    #[serde(rename = "fastapi")]
    FastApi,
    Django,
    #[default]
    None,
}

/// One row of the recognized-framework table.
struct FrameworkRule {
    framework: Framework,
    /// Top-level package name as written in `import` / `from` statements
    module: &'static str,
    keyword: &'static str,
}

/// Closed table of recognized frameworks. Order breaks ties.
const FRAMEWORK_RULES: &[FrameworkRule] = &[
    FrameworkRule {
        framework: Framework::Flask,
        module: "flask",
        keyword: "flask",
    },
    FrameworkRule {
        framework: Framework::FastApi,
        module: "fastapi",
        keyword: "fastapi",
    },
    FrameworkRule {
        framework: Framework::Django,
        module: "django",
        keyword: "django",
    },
];

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Flask => "flask",
            Framework::FastApi => "fastapi",
            Framework::Django => "django",
            Framework::None => "none",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Framework::None)
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the Detector stage found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub functions: Vec<String>,
    pub framework: Framework,
}

static TOP_LEVEL_DEF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap());

static README_FUNCTION_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // def name( in code blocks
        r"def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(",
        // `name(args)` in backticks
        r"`([A-Za-z_][A-Za-z0-9_]*)\s*\([^)]*\)`",
        // ### name(args) headers
        r"###\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(",
        // **name(args)** in bold
        r"\*\*([A-Za-z_][A-Za-z0-9_]*)\s*\([^)]*\)\*\*",
        // - name( in lists
        r"(?m)^\s*[-*•]\s*([A-Za-z_][A-Za-z0-9_]*)\s*\(",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static IMPORT_RES: Lazy<Vec<(Framework, Regex)>> = Lazy::new(|| {
    FRAMEWORK_RULES
        .iter()
        .map(|rule| {
            let re = Regex::new(&format!(r"(?m)^\s*(?:from|import)\s+{}\b", rule.module)).unwrap();
            (rule.framework, re)
        })
        .collect()
});

static README_KEYWORD_RES: Lazy<Vec<(Framework, Regex)>> = Lazy::new(|| {
    FRAMEWORK_RULES
        .iter()
        .map(|rule| {
            let re = Regex::new(&format!(r"(?i)\b{}\b", rule.keyword)).unwrap();
            (rule.framework, re)
        })
        .collect()
});

/// Run the Detector stage.
///
/// Functions come from the code; README mentions are only used when the
/// code has no public top-level functions.
pub fn detect(code: &str, readme: &str) -> Detection {
    let mut functions = extract_functions_from_code(code);
    if functions.is_empty() {
        functions = extract_functions_from_readme(readme);
    }
    Detection {
        functions,
        framework: detect_framework(code, readme),
    }
}

/// Public top-level function names in source order, deduplicated.
pub fn extract_functions_from_code(code: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut open_quote: Option<&str> = None;

    for line in code.lines() {
        if let Some(quote) = open_quote {
            open_quote = match line.find(quote) {
                Some(idx) => unterminated_triple_quote(&line[idx + quote.len()..]),
                None => Some(quote),
            };
            continue;
        }

        if let Some(caps) = TOP_LEVEL_DEF_RE.captures(line) {
            names.push(caps[1].to_string());
        }
        open_quote = unterminated_triple_quote(line);
    }

    dedupe_names(names, |name| !name.starts_with('_'))
}

/// Function mentions in README prose and snippets, deduplicated.
pub fn extract_functions_from_readme(readme: &str) -> Vec<String> {
    let mut hits: Vec<(usize, String)> = Vec::new();
    for re in README_FUNCTION_RES.iter() {
        for caps in re.captures_iter(readme) {
            if let Some(m) = caps.get(1) {
                hits.push((m.start(), m.as_str().to_string()));
            }
        }
    }
    // Order by position in the README so the result follows the document
    hits.sort_by_key(|(pos, _)| *pos);

    dedupe_names(hits.into_iter().map(|(_, name)| name), |name| {
        !name.starts_with('_') && !README_STOP_WORDS.contains(&name.to_lowercase().as_str())
    })
}

/// Best-guess framework: code imports first, README keywords second.
pub fn detect_framework(code: &str, readme: &str) -> Framework {
    if let Some((framework, _)) = IMPORT_RES.iter().find(|(_, re)| re.is_match(code)) {
        return *framework;
    }

    README_KEYWORD_RES
        .iter()
        .find(|(_, re)| re.is_match(readme))
        .map(|(framework, _)| *framework)
        .unwrap_or(Framework::None)
}

fn dedupe_names<I, F>(names: I, keep: F) -> Vec<String>
where
    I: IntoIterator<Item = String>,
    F: Fn(&str) -> bool,
{
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|name| keep(name.as_str()))
        .filter(|name| seen.insert(name.clone()))
        .take(MAX_FUNCTIONS)
        .collect()
}

/// Returns the delimiter of a triple-quoted string left open on this line.
/// Comments and single-line string literals are skipped.
fn unterminated_triple_quote(line: &str) -> Option<&'static str> {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'#' => return None,
            quote @ (b'"' | b'\'') => {
                let triple = if quote == b'"' { "\"\"\"" } else { "'''" };
                if line[i..].starts_with(triple) {
                    match line[i + 3..].find(triple) {
                        Some(end) => i += 3 + end + 3,
                        None => return Some(triple),
                    }
                } else {
                    i = skip_string_literal(bytes, i + 1, quote);
                }
            }
            _ => i += 1,
        }
    }
    None
}

/// Index just past the closing `quote` of a single-line literal.
fn skip_string_literal(bytes: &[u8], mut i: usize, quote: u8) -> usize {
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framework_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Framework::FastApi).unwrap(),
            "\"fastapi\""
        );
        assert_eq!(serde_json::to_string(&Framework::None).unwrap(), "\"none\"");
    }

    #[test]
    fn test_top_level_functions_in_source_order() {
        let code = r#"
import math

def area(r):
    return math.pi * r * r

async def fetch(url):
    return url

class Shape:
    def perimeter(self):
        return 0

def add(a, b):
    return a + b
"#;
        assert_eq!(
            extract_functions_from_code(code),
            vec!["area", "fetch", "add"]
        );
    }

    #[test]
    fn test_duplicates_and_private_removed() {
        let code = "def add(a, b):\n    return a + b\n\ndef _helper():\n    pass\n\ndef add(a, b):\n    return b + a\n";
        assert_eq!(extract_functions_from_code(code), vec!["add"]);
    }

    #[test]
    fn test_defs_inside_docstrings_ignored() {
        let code = r#"
"""
Example:

def not_real(x):
    pass
"""

def real(x):
    return x
"#;
        assert_eq!(extract_functions_from_code(code), vec!["real"]);
    }

    #[test]
    fn test_one_line_docstring_does_not_open_block() {
        let code = "\"\"\"Module docstring.\"\"\"\n\ndef first():\n    pass\n";
        assert_eq!(extract_functions_from_code(code), vec!["first"]);
    }

    #[test]
    fn test_triple_quotes_in_comment_ignored() {
        let code = r#"# docstrings use """ quotes
def add(a, b):
    return a + b

def sub(a, b):
    return a - b
"#;
        assert_eq!(extract_functions_from_code(code), vec!["add", "sub"]);
    }

    #[test]
    fn test_triple_quotes_in_string_literal_ignored() {
        let code = r#"SEP = '"""'
OTHER = "'''"
ESCAPED = 'it\'s """ fine'

def add(a, b):
    return a + b

def sub(a, b):
    return a - b
"#;
        assert_eq!(extract_functions_from_code(code), vec!["add", "sub"]);
    }

    #[test]
    fn test_docstring_opened_on_def_line() {
        let code = r#"def documented(): """Starts here
def not_real():
"""

def last():
    pass
"#;
        assert_eq!(extract_functions_from_code(code), vec!["documented", "last"]);
    }

    #[test]
    fn test_unterminated_triple_quote_scanning() {
        assert_eq!(unterminated_triple_quote(r#"x = """open"#), Some(r#"""""#));
        assert_eq!(unterminated_triple_quote("x = '''a''' + '''b"), Some("'''"));
        assert_eq!(unterminated_triple_quote(r#"x = """done""""#), None);
        assert_eq!(unterminated_triple_quote(r#"x = 'it\'s """'"#), None);
        assert_eq!(unterminated_triple_quote("y = 2  # '''"), None);
        assert_eq!(unterminated_triple_quote(r##"s = "# not a comment" + """open"##), Some(r#"""""#));
    }

    #[test]
    fn test_malformed_input_yields_empty_list() {
        assert!(extract_functions_from_code("").is_empty());
        assert!(extract_functions_from_code("}}}{{{ not python (((").is_empty());
        assert!(extract_functions_from_code("def (broken:\n").is_empty());
    }

    #[test]
    fn test_function_cap() {
        let code: String = (0..30)
            .map(|i| format!("def f{}():\n    pass\n", i))
            .collect();
        let names = extract_functions_from_code(&code);
        assert_eq!(names.len(), MAX_FUNCTIONS);
        assert_eq!(names[0], "f0");
    }

    #[test]
    fn test_readme_patterns() {
        let readme = r#"
# Calculator

### add(a, b)
Adds two numbers. See also `subtract(a, b)`.

- multiply(a, b): product
- **divide(a, b)** raises on zero
- returns(x) is not a function
"#;
        assert_eq!(
            extract_functions_from_readme(readme),
            vec!["add", "subtract", "multiply", "divide"]
        );
    }

    #[test]
    fn test_detect_framework_from_imports() {
        assert_eq!(
            detect_framework("from flask import Flask\napp = Flask(__name__)", ""),
            Framework::Flask
        );
        assert_eq!(
            detect_framework("import fastapi\n", ""),
            Framework::FastApi
        );
        assert_eq!(
            detect_framework("from django.http import HttpResponse\n", ""),
            Framework::Django
        );
    }

    #[test]
    fn test_import_requires_whole_module_name() {
        assert_eq!(detect_framework("import flask_cors\n", ""), Framework::None);
        assert_eq!(detect_framework("import flaskext\n", ""), Framework::None);
        assert_eq!(
            detect_framework("from django_filters import FilterSet\n", ""),
            Framework::None
        );
        assert_eq!(detect_framework("import flask.json\n", ""), Framework::Flask);
        assert_eq!(
            detect_framework("    from fastapi import APIRouter\n", ""),
            Framework::FastApi
        );
    }

    #[test]
    fn test_code_imports_win_over_readme() {
        let readme = "This Django project ...";
        let code = "from fastapi import FastAPI\n";
        assert_eq!(detect_framework(code, readme), Framework::FastApi);
    }

    #[test]
    fn test_detect_framework_from_readme_keyword() {
        assert_eq!(
            detect_framework("def add(a, b):\n    return a + b\n", "A Flask app with one route"),
            Framework::Flask
        );
        // Whole words only
        assert_eq!(
            detect_framework("", "Uses flasks of coffee"),
            Framework::None
        );
    }

    #[test]
    fn test_detect_prefers_code_functions() {
        let detection = detect(
            "def add(a,b): return a+b\n",
            "A Flask app with one route. Call `route_handler()`.",
        );
        assert_eq!(detection.functions, vec!["add"]);
        assert_eq!(detection.framework, Framework::Flask);
    }

    #[test]
    fn test_detect_falls_back_to_readme() {
        let detection = detect("x = 1\n", "Use `greet(name)` to say hello.");
        assert_eq!(detection.functions, vec!["greet"]);
        assert_eq!(detection.framework, Framework::None);
    }
}
