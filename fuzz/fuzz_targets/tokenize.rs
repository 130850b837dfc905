#![no_main]
use libfuzzer_sys::fuzz_target;

use pandasm::lexer::Lexer;

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        let mut lexer = Lexer::new();
        for line in source.lines() {
            let _ = lexer.tokenize_string(line);
        }
    }
});
