#![no_main]

use channel_express::protocol::ClientMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(msg) = serde_json::from_slice::<ClientMessage>(data) {
        // Whatever parses must serialize again.
        let _ = serde_json::to_string(&msg).map(|json| {
            let _ = serde_json::from_str::<ClientMessage>(&json);
        });
    }
});
