/// RC4 stream cipher state.
///
/// One instance per direction; the keystream runs across packet boundaries
/// and is only re-seeded on a session key update.
#[derive(Clone)]
pub struct Rc4 {
    i: u8,
    j: u8,
    state: [u8; 256],
}

impl Rc4 {
    pub fn new(key: &[u8]) -> Self {
        debug_assert!(!key.is_empty());

        // key scheduling
        let mut state = [0u8; 256];
        for (i, item) in state.iter_mut().enumerate() {
            *item = i as u8;
        }

        let mut j = 0u8;
        for i in 0..256 {
            j = j
                .wrapping_add(state[i])
                .wrapping_add(key[i % key.len()]);
            state.swap(i, usize::from(j));
        }

        Self { i: 0, j: 0, state }
    }

    /// XORs the keystream into `data` in place.
    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.state[usize::from(self.i)]);
            self.state.swap(usize::from(self.i), usize::from(self.j));
            let idx = self.state[usize::from(self.i)].wrapping_add(self.state[usize::from(self.j)]);
            *byte ^= self.state[usize::from(idx)];
        }
    }

    /// Convenience wrapper returning a new buffer.
    pub fn process(&mut self, data: &[u8]) -> Vec<u8> {
        let mut output = data.to_vec();
        self.apply(&mut output);
        output
    }
}

impl core::fmt::Debug for Rc4 {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // The S-box is key material, keep it out of logs.
        f.debug_struct("Rc4").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        let mut rc4 = Rc4::new(b"key");
        assert_eq!(rc4.process(b"message"), [0x66, 0x09, 0x47, 0x9E, 0x45, 0xE8, 0x1E]);
    }

    #[test]
    fn single_byte_key() {
        let mut rc4 = Rc4::new(b"0");
        assert_eq!(rc4.process(b"message"), [0xE5, 0x1A, 0xD5, 0xF3, 0xA2, 0x1C, 0xB1]);
    }

    #[test]
    fn empty_message() {
        let mut rc4 = Rc4::new(b"key");
        assert_eq!(rc4.process(b""), Vec::<u8>::new());
    }

    #[test]
    fn stream_continues_across_calls() {
        let mut one_shot = Rc4::new(b"key");
        let expected = one_shot.process(b"message");

        let mut split = Rc4::new(b"key");
        let mut out = split.process(b"mess");
        out.extend_from_slice(&split.process(b"age"));

        assert_eq!(out, expected);
    }

    #[test]
    fn symmetric() {
        let mut enc = Rc4::new(b"some key");
        let mut dec = Rc4::new(b"some key");

        let ciphertext = enc.process(b"attack at dawn");
        assert_eq!(dec.process(&ciphertext), b"attack at dawn");
    }
}
