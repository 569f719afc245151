mod error;
mod event_sink;
mod hash;
mod timestamp;

pub use error::{err, Error, Result};
pub use event_sink::{EventSink, RecordingEventSink, TracingEventSink};
pub use hash::{adler32, Md5Digest, RollingMd5};
pub use timestamp::Timestamp;
