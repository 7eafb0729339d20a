pub mod core;
pub mod courses;
pub mod enrollments;
pub mod grading;
pub mod marksheets;
