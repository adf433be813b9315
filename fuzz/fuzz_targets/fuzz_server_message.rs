#![no_main]

use channel_express::protocol::{select_presenter, ServerMessage};
use channel_express::signaling::StreamScope;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(msg) = serde_json::from_slice::<ServerMessage>(data) else {
        return;
    };
    let _ = msg.request_id();
    match msg {
        ServerMessage::JoinRoomResponse(response) => {
            let _ = select_presenter(&response.members);
        }
        ServerMessage::RoomEvent(event) => {
            let _ = select_presenter(&event.members);
        }
        ServerMessage::StreamEnded(ended) => {
            let scope = StreamScope {
                stream_id: ended.stream_id.clone(),
                session_id: ended.session_id.clone(),
            };
            assert!(scope.matches(&ended));
            let _ = ended.reason.is_terminal();
        }
        _ => {}
    }
});
