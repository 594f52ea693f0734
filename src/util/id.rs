use std::time::{Duration, SystemTime};

/// Short random lowercase-hex id (`2 * bytes` chars) for throwaway container names.
///
/// Falls back to a time/pid mix when the OS RNG is unavailable; the ids only need to
/// avoid collisions between concurrent invocations, not be unpredictable.
pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    if getrandom::getrandom(&mut buf).is_err() {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0));
        let mut mix = now.as_nanos() ^ ((std::process::id() as u128) << 64);
        for b in buf.iter_mut() {
            *b = (mix & 0xff) as u8;
            mix = mix.rotate_right(8) ^ 0x9e37_79b9;
        }
    }
    buf.iter().map(|b| format!("{b:02x}")).collect()
}
