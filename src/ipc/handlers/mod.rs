pub mod core;
pub mod grades;
pub mod results;
pub mod semesters;
pub mod students;
pub mod subjects;
