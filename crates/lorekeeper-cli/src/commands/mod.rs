pub mod backup;
pub mod common;
pub mod diagnostics;
pub mod integrity;
pub mod status;
pub mod sync;
