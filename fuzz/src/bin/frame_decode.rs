#[macro_use]
extern crate afl;
use hushpost::TransportEvent;

fn main() {
    fuzz!(|data: &[u8]| {
        if let Ok(frame) = std::str::from_utf8(data) {
            let _ = TransportEvent::from_frame(frame);
        }
    });
}
