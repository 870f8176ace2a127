//! Video ingestion: CSV import/export, the scrape-job executor, and the
//! scheduled runner that kicks jobs off through the controller API.

pub mod csv_io;
pub mod executor;
pub mod runner;

pub use csv_io::{
    export_csv, import_csv, import_csv_str, parse_csv_line, render_csv, CsvError, ImportSummary,
    CSV_HEADERS,
};
pub use executor::{ActiveJobs, JobExecutor};
pub use runner::{
    build_scheduler, ControllerError, JobControllerClient, RunnerReport, ScheduledRunner,
};

pub const CRATE_NAME: &str = "scout-sync";
