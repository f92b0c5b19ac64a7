pub mod activity_reader;
pub mod catalog_reader;
pub mod enrollment_writer;
