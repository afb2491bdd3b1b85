#![cfg(not(target_arch = "wasm32"))]

use cabinet_devices::{Cabinet, CabinetConfig};
use cabinet_frame::IoBuf;
use cabinet_jvs::packet::status;
use cabinet_jvs::{decode_response, encode_request, split_frames, BROADCAST};
use cabinet_tests::PanelBackend;
use proptest::prelude::*;

fn sync_cabinet(nodes: u8) -> Cabinet {
    let mut config = CabinetConfig::default();
    config.jvs.nodes = nodes;
    config.jvs.async_reads = false;
    Cabinet::new(&config, vec![PanelBackend::default(); usize::from(nodes)]).unwrap()
}

proptest! {
    #[test]
    fn arbitrary_writes_yield_only_well_formed_responses(
        writes in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..48), 1..8),
    ) {
        let cabinet = sync_cabinet(2);
        let chain = cabinet.chain();
        let h = chain.open("COM4").unwrap();

        for bytes in &writes {
            chain.write(h, bytes).unwrap();
            let raw = chain.read(h, 4096).unwrap();
            for frame in split_frames(&raw) {
                let resp = decode_response(frame);
                prop_assert!(resp.is_ok(), "malformed response {:?}", resp);
            }
        }
    }

    #[test]
    fn any_command_sequence_gets_at_most_one_frame_per_node(
        cmds in proptest::collection::vec(any::<u8>(), 1..32),
    ) {
        let cabinet = sync_cabinet(3);
        let chain = cabinet.chain();
        let h = chain.open("COM4").unwrap();

        let mut frame = IoBuf::with_capacity(128);
        encode_request(BROADCAST, &cmds, &mut frame).unwrap();
        chain.write(h, frame.filled()).unwrap();
        let raw = chain.read(h, 4096).unwrap();

        let frames = split_frames(&raw);
        prop_assert!(frames.len() <= 3);
        for frame in frames {
            let resp = decode_response(frame).unwrap();
            prop_assert!(matches!(
                resp.status,
                status::OK | status::UNSUPPORTED | status::OVERFLOW
            ));
        }
    }
}
