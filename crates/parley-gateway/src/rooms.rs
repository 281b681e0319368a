/// Derive the room key for a pair of identities: sorted and joined, so
/// either participant computes the same key. Rooms are never persisted.
pub fn pair_key(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}_{hi}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_symmetric() {
        assert_eq!(pair_key("alice", "bob"), pair_key("bob", "alice"));
    }

    #[test]
    fn key_is_deterministic() {
        assert_eq!(pair_key("alice", "bob"), "alice_bob");
        assert_eq!(pair_key("zed", "amy"), "amy_zed");
    }

    #[test]
    fn distinct_pairs_get_distinct_keys() {
        assert_ne!(pair_key("alice", "bob"), pair_key("alice", "carol"));
    }
}
