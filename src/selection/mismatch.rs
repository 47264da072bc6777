/// Whether the current Minor pair differs from the admission-time pair.
/// Order does not matter. Nothing to compare until both current slots are
/// filled and an earlier pair exists.
pub fn detect(current: [Option<&str>; 2], earlier: Option<[&str; 2]>) -> bool {
    let (Some(earlier), [Some(a), Some(b)]) = (earlier, current) else {
        return false;
    };
    let mut now = [a, b];
    let mut before = earlier;
    now.sort_unstable();
    before.sort_unstable();
    now != before
}
