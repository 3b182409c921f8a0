pub mod data_format;
pub mod loaders;
pub mod sections;

pub use data_format::{CaseData, CaseInput, CrsInput, EllInput};
pub use loaders::{
    CHECK_FILE, INPUT_FILE, load_case_dir, load_crs_input, load_ell_input, load_output,
    write_case_input, write_crs_input, write_ell_input, write_output,
};
