//! Exhaustive optional-section coverage for every message class.
//!
//! For each class, every combination of its optional header sections is
//! encoded and decoded, and the decoded message must present exactly the
//! sections that were set: nothing dropped, nothing invented.

use codec::{
    AckMsg, CloseMsg, DataType, DecodeIter, EncodeIter, GenericMsg, Msg, MsgBase, MsgKey,
    MsgKeyAttrib, PostMsg, PostUserInfo, Priority, Qos, QosRate, QosTimeliness, RefreshMsg,
    RequestMsg, StatusMsg, UpdateMsg, State, StreamState, DataState, WireVersion,
};

const PERM: &[u8] = &[0x03, 0x01, 0x4C];
const EXT: &[u8] = b"xhdr";
const GROUP: &[u8] = &[0x00, 0x02];

fn sample_key() -> MsgKey<'static> {
    MsgKey {
        service_id: Some(260),
        name: Some(b"TRI.N"),
        name_type: Some(1),
        filter: Some(0x2F),
        identifier: Some(-9),
        attrib: Some(MsgKeyAttrib::new(DataType::Opaque, b"\x10\x20\x30")),
    }
}

fn delayed_qos() -> Qos {
    Qos {
        timeliness: QosTimeliness::Delayed,
        rate: QosRate::TimeConflated,
        dynamic: true,
        time_info: 60,
        rate_info: 1500,
    }
}

fn roundtrip(msg: &Msg<'_>) -> Vec<u8> {
    let mut buf = vec![0u8; 2048];
    let mut enc = EncodeIter::new(&mut buf, WireVersion::CURRENT);
    msg.encode(&mut enc).unwrap();
    let n = enc.position();
    buf.truncate(n);
    buf
}

fn assert_keys_equal(got: Option<&MsgKey<'_>>, want: Option<&MsgKey<'_>>) {
    match (got, want) {
        (None, None) => {}
        (Some(g), Some(w)) => {
            assert_eq!(g.service_id, w.service_id);
            assert_eq!(g.name, w.name);
            assert_eq!(g.name_type, w.name_type);
            assert_eq!(g.filter, w.filter);
            assert_eq!(g.identifier, w.identifier);
            match (&g.attrib, &w.attrib) {
                (None, None) => {}
                (Some(ga), Some(wa)) => {
                    assert_eq!(ga.container_type, wa.container_type);
                    assert_eq!(ga.data, wa.data);
                }
                other => panic!("attrib presence mismatch: {other:?}"),
            }
        }
        other => panic!("key presence mismatch: {other:?}"),
    }
}

#[test]
fn update_all_section_combinations() {
    for bits in 0u32..64 {
        let msg = Msg::Update(UpdateMsg {
            base: MsgBase {
                msg_key: (bits & 1 != 0).then(sample_key),
                extended_header: (bits & 2 != 0).then_some(EXT),
                ..MsgBase::new(6, 4, DataType::NoData)
            },
            update_type: 3,
            seq_num: (bits & 4 != 0).then_some(1001),
            conf_info: (bits & 8 != 0).then_some((5, 300)),
            perm_data: (bits & 16 != 0).then_some(PERM),
            post_user_info: (bits & 32 != 0).then_some(PostUserInfo {
                user_addr: 7,
                user_id: 8,
            }),
            ..UpdateMsg::default()
        });
        let bytes = roundtrip(&msg);
        let mut dec = DecodeIter::new(&bytes, WireVersion::CURRENT);
        let (want, got) = match (&msg, Msg::decode(&mut dec).unwrap()) {
            (Msg::Update(w), Msg::Update(g)) => (*w, g),
            other => panic!("class mismatch at bits {bits}: {other:?}"),
        };
        assert_eq!(got.update_type, 3, "bits {bits}");
        assert_eq!(got.seq_num, want.seq_num, "bits {bits}");
        assert_eq!(got.conf_info, want.conf_info, "bits {bits}");
        assert_eq!(got.perm_data, want.perm_data, "bits {bits}");
        assert_eq!(got.post_user_info, want.post_user_info, "bits {bits}");
        assert_eq!(
            got.base.extended_header, want.base.extended_header,
            "bits {bits}"
        );
        assert_keys_equal(got.base.msg_key.as_ref(), want.base.msg_key.as_ref());
    }
}

#[test]
fn refresh_all_section_combinations() {
    for bits in 0u32..128 {
        let msg = Msg::Refresh(RefreshMsg {
            base: MsgBase {
                msg_key: (bits & 1 != 0).then(sample_key),
                extended_header: (bits & 2 != 0).then_some(EXT),
                ..MsgBase::new(6, 4, DataType::NoData)
            },
            seq_num: (bits & 4 != 0).then_some(55),
            state: State::new(StreamState::Open, DataState::Ok).with_text(b"fine"),
            group_id: GROUP,
            perm_data: (bits & 8 != 0).then_some(PERM),
            qos: (bits & 16 != 0).then(delayed_qos),
            part_num: (bits & 32 != 0).then_some(2),
            post_user_info: (bits & 64 != 0).then_some(PostUserInfo {
                user_addr: 1,
                user_id: 2,
            }),
            solicited: bits % 2 == 0,
            refresh_complete: true,
            ..RefreshMsg::default()
        });
        let bytes = roundtrip(&msg);
        let mut dec = DecodeIter::new(&bytes, WireVersion::CURRENT);
        let (want, got) = match (&msg, Msg::decode(&mut dec).unwrap()) {
            (Msg::Refresh(w), Msg::Refresh(g)) => (*w, g),
            other => panic!("class mismatch at bits {bits}: {other:?}"),
        };
        assert_eq!(got.seq_num, want.seq_num, "bits {bits}");
        assert_eq!(got.state, want.state, "bits {bits}");
        assert_eq!(got.group_id, want.group_id, "bits {bits}");
        assert_eq!(got.perm_data, want.perm_data, "bits {bits}");
        assert_eq!(got.qos, want.qos, "bits {bits}");
        assert_eq!(got.part_num, want.part_num, "bits {bits}");
        assert_eq!(got.post_user_info, want.post_user_info, "bits {bits}");
        assert_eq!(got.solicited, want.solicited, "bits {bits}");
        assert!(got.refresh_complete, "bits {bits}");
        assert_eq!(
            got.base.extended_header, want.base.extended_header,
            "bits {bits}"
        );
        assert_keys_equal(got.base.msg_key.as_ref(), want.base.msg_key.as_ref());
    }
}

#[test]
fn request_all_section_combinations() {
    for bits in 0u32..16 {
        let msg = Msg::Request(RequestMsg {
            base: MsgBase {
                msg_key: Some(sample_key()),
                extended_header: (bits & 1 != 0).then_some(EXT),
                ..MsgBase::new(6, 4, DataType::NoData)
            },
            priority: (bits & 2 != 0).then_some(Priority { class: 3, count: 400 }),
            qos: (bits & 4 != 0).then(Qos::default),
            worst_qos: (bits & 8 != 0).then(delayed_qos),
            streaming: true,
            pause: bits % 2 == 1,
            ..RequestMsg::default()
        });
        let bytes = roundtrip(&msg);
        let mut dec = DecodeIter::new(&bytes, WireVersion::CURRENT);
        let (want, got) = match (&msg, Msg::decode(&mut dec).unwrap()) {
            (Msg::Request(w), Msg::Request(g)) => (*w, g),
            other => panic!("class mismatch at bits {bits}: {other:?}"),
        };
        assert_eq!(got.priority, want.priority, "bits {bits}");
        assert_eq!(got.qos, want.qos, "bits {bits}");
        assert_eq!(got.worst_qos, want.worst_qos, "bits {bits}");
        assert_eq!(got.pause, want.pause, "bits {bits}");
        assert!(got.streaming, "bits {bits}");
        assert_eq!(
            got.base.extended_header, want.base.extended_header,
            "bits {bits}"
        );
        assert_keys_equal(got.base.msg_key.as_ref(), want.base.msg_key.as_ref());
    }
}

#[test]
fn status_all_section_combinations() {
    for bits in 0u32..64 {
        let msg = Msg::Status(StatusMsg {
            base: MsgBase {
                msg_key: (bits & 1 != 0).then(sample_key),
                extended_header: (bits & 2 != 0).then_some(EXT),
                ..MsgBase::new(6, 4, DataType::NoData)
            },
            state: (bits & 4 != 0)
                .then(|| State::new(StreamState::ClosedRecover, DataState::Suspect)),
            group_id: (bits & 8 != 0).then_some(GROUP),
            perm_data: (bits & 16 != 0).then_some(PERM),
            post_user_info: (bits & 32 != 0).then_some(PostUserInfo {
                user_addr: 3,
                user_id: 4,
            }),
            ..StatusMsg::default()
        });
        let bytes = roundtrip(&msg);
        let mut dec = DecodeIter::new(&bytes, WireVersion::CURRENT);
        let (want, got) = match (&msg, Msg::decode(&mut dec).unwrap()) {
            (Msg::Status(w), Msg::Status(g)) => (*w, g),
            other => panic!("class mismatch at bits {bits}: {other:?}"),
        };
        assert_eq!(got.state, want.state, "bits {bits}");
        assert_eq!(got.group_id, want.group_id, "bits {bits}");
        assert_eq!(got.perm_data, want.perm_data, "bits {bits}");
        assert_eq!(got.post_user_info, want.post_user_info, "bits {bits}");
        assert_eq!(
            got.base.extended_header, want.base.extended_header,
            "bits {bits}"
        );
        assert_keys_equal(got.base.msg_key.as_ref(), want.base.msg_key.as_ref());
    }
}

#[test]
fn close_all_section_combinations() {
    for bits in 0u32..4 {
        let msg = Msg::Close(CloseMsg {
            base: MsgBase {
                extended_header: (bits & 1 != 0).then_some(EXT),
                ..MsgBase::new(6, 4, DataType::NoData)
            },
            ack: bits & 2 != 0,
        });
        let bytes = roundtrip(&msg);
        let mut dec = DecodeIter::new(&bytes, WireVersion::CURRENT);
        let (want, got) = match (&msg, Msg::decode(&mut dec).unwrap()) {
            (Msg::Close(w), Msg::Close(g)) => (*w, g),
            other => panic!("class mismatch at bits {bits}: {other:?}"),
        };
        assert_eq!(got.ack, want.ack, "bits {bits}");
        assert_eq!(
            got.base.extended_header, want.base.extended_header,
            "bits {bits}"
        );
    }
}

#[test]
fn ack_all_section_combinations() {
    for bits in 0u32..32 {
        let msg = Msg::Ack(AckMsg {
            base: MsgBase {
                msg_key: (bits & 1 != 0).then(sample_key),
                extended_header: (bits & 2 != 0).then_some(EXT),
                ..MsgBase::new(6, 4, DataType::NoData)
            },
            ack_id: 31337,
            nak_code: (bits & 4 != 0).then_some(5),
            text: (bits & 8 != 0).then_some(&b"nak text"[..]),
            seq_num: (bits & 16 != 0).then_some(90),
            ..AckMsg::default()
        });
        let bytes = roundtrip(&msg);
        let mut dec = DecodeIter::new(&bytes, WireVersion::CURRENT);
        let (want, got) = match (&msg, Msg::decode(&mut dec).unwrap()) {
            (Msg::Ack(w), Msg::Ack(g)) => (*w, g),
            other => panic!("class mismatch at bits {bits}: {other:?}"),
        };
        assert_eq!(got.ack_id, 31337, "bits {bits}");
        assert_eq!(got.nak_code, want.nak_code, "bits {bits}");
        assert_eq!(got.text, want.text, "bits {bits}");
        assert_eq!(got.seq_num, want.seq_num, "bits {bits}");
        assert_eq!(
            got.base.extended_header, want.base.extended_header,
            "bits {bits}"
        );
        assert_keys_equal(got.base.msg_key.as_ref(), want.base.msg_key.as_ref());
    }
}

#[test]
fn generic_all_section_combinations() {
    for bits in 0u32..64 {
        let msg = Msg::Generic(GenericMsg {
            base: MsgBase {
                msg_key: (bits & 1 != 0).then(sample_key),
                extended_header: (bits & 2 != 0).then_some(EXT),
                ..MsgBase::new(6, 4, DataType::NoData)
            },
            seq_num: (bits & 4 != 0).then_some(10),
            secondary_seq_num: (bits & 8 != 0).then_some(11),
            perm_data: (bits & 16 != 0).then_some(PERM),
            part_num: (bits & 32 != 0).then_some(6),
            message_complete: true,
        });
        let bytes = roundtrip(&msg);
        let mut dec = DecodeIter::new(&bytes, WireVersion::CURRENT);
        let (want, got) = match (&msg, Msg::decode(&mut dec).unwrap()) {
            (Msg::Generic(w), Msg::Generic(g)) => (*w, g),
            other => panic!("class mismatch at bits {bits}: {other:?}"),
        };
        assert_eq!(got.seq_num, want.seq_num, "bits {bits}");
        assert_eq!(got.secondary_seq_num, want.secondary_seq_num, "bits {bits}");
        assert_eq!(got.perm_data, want.perm_data, "bits {bits}");
        assert_eq!(got.part_num, want.part_num, "bits {bits}");
        assert!(got.message_complete, "bits {bits}");
        assert_eq!(
            got.base.extended_header, want.base.extended_header,
            "bits {bits}"
        );
        assert_keys_equal(got.base.msg_key.as_ref(), want.base.msg_key.as_ref());
    }
}

#[test]
fn post_all_section_combinations() {
    for bits in 0u32..128 {
        let msg = Msg::Post(PostMsg {
            base: MsgBase {
                msg_key: (bits & 1 != 0).then(sample_key),
                extended_header: (bits & 2 != 0).then_some(EXT),
                ..MsgBase::new(6, 4, DataType::NoData)
            },
            post_user_info: PostUserInfo {
                user_addr: 0x7F000001,
                user_id: 99,
            },
            seq_num: (bits & 4 != 0).then_some(12),
            post_id: (bits & 8 != 0).then_some(13),
            perm_data: (bits & 16 != 0).then_some(PERM),
            part_num: (bits & 32 != 0).then_some(1),
            post_user_rights: (bits & 64 != 0).then_some(3),
            post_complete: true,
            ..PostMsg::default()
        });
        let bytes = roundtrip(&msg);
        let mut dec = DecodeIter::new(&bytes, WireVersion::CURRENT);
        let (want, got) = match (&msg, Msg::decode(&mut dec).unwrap()) {
            (Msg::Post(w), Msg::Post(g)) => (*w, g),
            other => panic!("class mismatch at bits {bits}: {other:?}"),
        };
        assert_eq!(got.post_user_info, want.post_user_info, "bits {bits}");
        assert_eq!(got.seq_num, want.seq_num, "bits {bits}");
        assert_eq!(got.post_id, want.post_id, "bits {bits}");
        assert_eq!(got.perm_data, want.perm_data, "bits {bits}");
        assert_eq!(got.part_num, want.part_num, "bits {bits}");
        assert_eq!(got.post_user_rights, want.post_user_rights, "bits {bits}");
        assert!(got.post_complete, "bits {bits}");
        assert_eq!(
            got.base.extended_header, want.base.extended_header,
            "bits {bits}"
        );
        assert_keys_equal(got.base.msg_key.as_ref(), want.base.msg_key.as_ref());
    }
}
