//! WebTests CLI
//!
//! Runs the EHU website scenarios or the Books API suite and renders the
//! results.

pub mod books;
pub mod commands;
pub mod output;
