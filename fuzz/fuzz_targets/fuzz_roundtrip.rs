#![no_main]
use libfuzzer_sys::fuzz_target;
use ppmd_stream::{compress, decompress, CodecOptions, RestoreMethod};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // Byte 0: variant in bit 7, restore method in bit 6, order in the rest
    let selector = data[0];
    let input = &data[1..];
    let options = if selector & 0x80 == 0 {
        CodecOptions::ppmd7(2 + u32::from(selector & 0x3F), 1 << 16)
    } else {
        let restore = if selector & 0x40 != 0 {
            RestoreMethod::CutOff
        } else {
            RestoreMethod::Restart
        };
        CodecOptions::ppmd8(2 + u32::from(selector & 0x0F) % 15, 1 << 16, restore)
    };

    let packed = compress(&options, input).expect("valid options");
    let unpacked = decompress(&options, &packed).expect("own output decodes");
    assert_eq!(unpacked, input);
});
