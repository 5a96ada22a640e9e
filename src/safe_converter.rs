/// Narrowing casts for values whose range is guaranteed by protocol logic, e.g. the number of
///  buffered segments (bounded by the receive window) or the number of segments in flight
///  (never negative).
///
/// NB: The implementations panic if the guarantee is violated, since that is a bug
pub trait PrecheckedCast<T> {
    fn prechecked_cast(self) -> T;
}

impl PrecheckedCast<u32> for usize {
    fn prechecked_cast(self) -> u32 {
        self.try_into().expect("bug: protocol logic should have bounded this value to u32")
    }
}

impl PrecheckedCast<u32> for i32 {
    fn prechecked_cast(self) -> u32 {
        self.try_into().expect("bug: protocol logic should have ensured a non-negative value")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_range() {
        let len: u32 = 17usize.prechecked_cast();
        assert_eq!(len, 17);
        let diff: u32 = 0i32.prechecked_cast();
        assert_eq!(diff, 0);
    }

    #[test]
    #[should_panic]
    fn test_negative() {
        let _: u32 = (-1i32).prechecked_cast();
    }
}
