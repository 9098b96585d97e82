/// Useful enumerations for configuring fits and inspecting their results.
pub mod enums;
