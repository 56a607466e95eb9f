pub mod reader;
pub mod state;
pub mod watch;

pub use reader::{DockStateReader, SourcePriority, parse_acpi_int};
pub use state::{CommandByte, DockBit, DockState};
pub use watch::{ChangeFilter, WatchEvent};
