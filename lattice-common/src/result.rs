pub type Result<T> = std::result::Result<T, crate::error::Error>;

pub fn verify_arg(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        Err(crate::error::Error::reader_state(format!(
            "{name}: expected {condition}"
        )))
    }
}

pub fn verify_data(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        Err(crate::error::Error::internal(format!(
            "{name}: expected {condition}"
        )))
    }
}
