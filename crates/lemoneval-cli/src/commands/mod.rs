pub mod grade;
pub mod validate;
