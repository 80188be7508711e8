//! Application orchestration module

pub mod execution;
pub mod initialization;
pub mod report;

pub use execution::{list_modules, run_scan};
pub use initialization::{
    build_scan_config,
    configure_logging,
    load_configuration,
    load_modules,
    module_names,
};
