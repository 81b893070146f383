/*!
 * Logging Module
 * Child output routing to per-app log files
 */

pub mod router;
pub mod sink;
pub mod timestamp;

pub use router::{ChildStreams, LogRouter};
pub use sink::{Destination, DestinationReport, LogSink, SinkReport};
pub use timestamp::{frame_line, line_prefix};
