//! Pure provider converters (OpenAI, Anthropic, Gemini) and their streaming
//! mergers. Every function here is a pure mapping with no I/O: the LLM proxy
//! routes own the network calls, this crate only knows shapes.

pub mod anthropic;
pub mod gemini;
pub mod merger;
pub mod openai;
