#![no_main]

use libfuzzer_sys::fuzz_target;

use wastfront::wat::Lexer;

fuzz_target!(|data: &[u8]| {
    let source = String::from_utf8_lossy(data);

    // An unknown word yields an error and a token, so two items per byte at most.
    let mut count = 0usize;
    for result in Lexer::new(&source, "fuzz.wat") {
        let _ = result;
        count += 1;
        assert!(count <= 2 * source.len() + 1);
    }
});
