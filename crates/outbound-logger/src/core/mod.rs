mod notes;
mod recorder;
mod server;
mod sink;
mod writer;

pub use notes::{NoteStore, run_note_pruner};
pub use recorder::Recorder;
pub use server::run_tcp_server;
pub use sink::SinkSet;
pub use writer::run_record_writer;
