#![no_main]
use libfuzzer_sys::fuzz_target;
use nadeko::core::source::{read_all, TarStream};
use std::io::Cursor;

// Arbitrary bytes must produce entries or an error, never a panic
fuzz_target!(|data: &[u8]| {
    if let Ok(mut stream) = TarStream::new(Cursor::new(data.to_vec())) {
        let _ = read_all(&mut stream);
    }
});
