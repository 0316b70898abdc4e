#![no_main]
use libfuzzer_sys::fuzz_target;
use ppmd_stream::io::SliceSource;
use ppmd_stream::stream::Decoder;
use ppmd_stream::{Ppmd8, RestoreMethod};

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // Byte 0: order (2-16) in the low nibble, restore method in bit 7
    let order = 2 + u32::from(data[0] & 0x0F) % 15;
    let restore = if data[0] & 0x80 != 0 {
        RestoreMethod::CutOff
    } else {
        RestoreMethod::Restart
    };

    // Byte 1: memory size, 64 KiB to 4 MiB
    let memory_size = (1u32 << 16) << (data[1] % 7);

    let Ok(model) = Ppmd8::new(order, memory_size, restore) else {
        return;
    };
    let Ok(mut decoder) = Decoder::new(model, SliceSource::new(&data[2..])) else {
        return;
    };

    let mut buf = [0u8; 4096];
    for _ in 0..256 {
        match decoder.decode(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
    let _ = decoder.finish();
});
