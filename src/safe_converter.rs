/// For narrowing casts where business logic ensures that the value is in the narrower type's range.
/// NB: The implementations will panic otherwise
pub trait PrecheckedCast<T> {
    fn prechecked_cast(self) -> T;
}
impl PrecheckedCast<u32> for usize {
    fn prechecked_cast(self) -> u32 {
        self.try_into().expect("this is a bug: message size should have been checked against u32::MAX")
    }
}

/// Checks that a message of `len` bytes can be represented in the header's 32 bit size field
pub fn check_message_size(len: usize) -> anyhow::Result<u32> {
    u32::try_from(len)
        .map_err(|_| anyhow::anyhow!("message size {} exceeds the maximum of {} bytes", len, u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_message_size() {
        assert_eq!(check_message_size(24).unwrap(), 24);
        assert_eq!(check_message_size(u32::MAX as usize).unwrap(), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        assert!(check_message_size(u32::MAX as usize + 1).is_err());
    }

    #[test]
    fn test_prechecked_cast() {
        let n: u32 = 17usize.prechecked_cast();
        assert_eq!(n, 17);
    }
}
