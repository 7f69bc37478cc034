pub mod design;
pub mod status;
