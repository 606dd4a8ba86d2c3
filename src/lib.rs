//! testloop - Generate pytest suites for a Python file with an LLM feedback loop
//!
//! Detects the functions and web framework of the code under test, asks a
//! language model for tests, runs them with pytest and feeds failures back
//! to the model until the suite passes or the iteration cap is reached.
//! Supports multiple LLM providers (Groq, OpenAI, Anthropic, Gemini, Ollama).

pub mod cli;
pub mod config;
pub mod detector;
pub mod error;
pub mod exit_codes;
pub mod llm;
pub mod pipeline;
pub mod util;
