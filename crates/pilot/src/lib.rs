pub mod errors;
pub mod models;
pub mod prompt_template;
pub mod providers;
pub mod retention;
pub mod sampling_loop;
pub mod tools;
