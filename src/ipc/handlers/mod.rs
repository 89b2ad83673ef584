pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod enrollment;
pub mod guardians;
pub mod links;
pub mod schools;
pub mod students;
pub mod subjects;
pub mod teachers;
