#[macro_use]
extern crate afl;
use hushpost::store::{LocalKeyRecord, LocalPlaintextRecord};

fn main() {
    fuzz!(|data: &[u8]| {
        let _ = LocalKeyRecord::deserialize(data);
        let _ = LocalPlaintextRecord::deserialize(data);
    });
}
