// Discord commands module.
// Each feature gets its own command file.

pub mod gdrive;

pub mod presence;
