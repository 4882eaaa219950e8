#![forbid(unsafe_code)]

pub mod chapter;
pub mod cli;
pub mod commands;
pub mod document;
pub mod download;
pub mod fetch;
pub mod formats;
pub mod layout;
pub mod logging;
pub mod normalize;
pub mod page_store;
pub mod pipeline;
pub mod site;
