#![no_main]
use libfuzzer_sys::fuzz_target;

use pandasm::parser::Parser;

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        let _ = Parser::parse_source(source, "fuzz.pa");
    }
});
