#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

pub mod test_context;

#[cfg(test)]
mod tests;
