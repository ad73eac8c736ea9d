pub mod array;
pub mod datatype;
pub mod nested;
pub mod physical_type;
pub mod scalar;
pub mod string;
pub mod validity;
