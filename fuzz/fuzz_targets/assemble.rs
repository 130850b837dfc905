#![no_main]
use libfuzzer_sys::fuzz_target;

use pandasm::emitter::AsmEmitter;
use pandasm::parser::Parser;

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        if let Ok((program, _warnings)) = Parser::parse_source(source, "fuzz.pa") {
            let _ = AsmEmitter::emit_to_memory(&program, None);
        }
    }
});
