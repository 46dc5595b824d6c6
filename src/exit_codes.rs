use crate::events::Status;

/// Process exit codes of the `copyflow` binary.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const COMPLETED_WITH_ERRORS: i32 = 2;
    pub const CANCELLED: i32 = 3;
}

/// Exit code for a run's terminal status.
pub fn for_status(status: Status) -> i32 {
    match status {
        Status::Complete => exit::SUCCESS,
        Status::CompletedWithErrors => exit::COMPLETED_WITH_ERRORS,
        Status::Cancelled | Status::Cancelling => exit::CANCELLED,
        _ => exit::FAILURE,
    }
}
