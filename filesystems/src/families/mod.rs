// Filesystem Families Organization

pub mod ext;
