mod fallback;
mod transport;

pub use fallback::{Completion, CompletionSource, FallbackOrchestrator};
pub use transport::{ByteStream, HttpTransport, Transport, parse_full_response};
