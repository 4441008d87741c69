mod codex;
mod gemini;
mod generic;

pub use codex::{parse_event_stream, CodexAdapter};
pub use gemini::{parse_json_blob, GeminiAdapter};
pub use generic::GenericAdapter;
