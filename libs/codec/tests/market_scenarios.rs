//! End-to-end envelope/container scenarios shaped like real provider
//! traffic: an order-book refresh (map of field lists with summary and set
//! definitions) and a dictionary-style series payload.

use codec::{
    decode_from_span, DataType, DecodeIter, EncodeIter, FieldEntry, FieldList, FieldSetDef,
    FieldSetDefEntry, InitOutcome, LocalFieldSetDefDb, Map, MapEntryAction, Msg, MsgBase, MsgKey,
    Real, RealHint, RefreshMsg, State, UInt, WireVersion, DataState, StreamState,
};

fn order_book_set_db() -> LocalFieldSetDefDb {
    let mut db = LocalFieldSetDefDb::new();
    db.add(FieldSetDef {
        set_id: 0,
        entries: vec![
            FieldSetDefEntry {
                field_id: 22, // price
                data_type: DataType::Real4Rb,
            },
            FieldSetDefEntry {
                field_id: 30, // size
                data_type: DataType::UInt4,
            },
        ],
    })
    .unwrap();
    db
}

#[test]
fn order_book_refresh_round_trips() {
    let db = order_book_set_db();
    let mut buf = vec![0u8; 4096];
    let mut enc = EncodeIter::new(&mut buf, WireVersion::CURRENT);

    let msg = Msg::Refresh(RefreshMsg {
        base: MsgBase::new(8, 5, DataType::Map)
            .key(MsgKey::with_name(b"BB.TO").service_id(1)),
        state: State::new(StreamState::Open, DataState::Ok),
        group_id: &[0, 1],
        solicited: true,
        refresh_complete: true,
        ..RefreshMsg::default()
    });
    assert_eq!(
        msg.encode_init(&mut enc).unwrap(),
        codec::MsgEncodePhase::PayloadPending
    );

    let map = Map::new(DataType::Real, DataType::FieldList)
        .key_field_id(22)
        .with_set_defs()
        .with_summary()
        .total_count_hint(2);
    map.encode_init(&mut enc).unwrap();
    db.encode(&mut enc).unwrap();
    map.encode_set_defs_complete(&mut enc, true).unwrap();
    // summary: currency and market state
    FieldList::with_standard_data()
        .encode_init(&mut enc, None)
        .unwrap();
    FieldEntry::new(15)
        .encode_value(&mut enc, &codec::EnumValue(124))
        .unwrap();
    FieldList::encode_complete(&mut enc, true).unwrap();
    map.encode_summary_complete(&mut enc, true).unwrap();

    for (price, size) in [(10_25i64, 500u64), (10_50, 1200)] {
        map.encode_entry_init(
            &mut enc,
            MapEntryAction::Add,
            &Real::new(price, RealHint::ExponentNeg2),
            None,
        )
        .unwrap();
        FieldList::new()
            .set_data(0)
            .encode_init(&mut enc, Some(&db))
            .unwrap();
        FieldEntry::new(22)
            .encode_value(&mut enc, &Real::new(price, RealHint::ExponentNeg2))
            .unwrap();
        FieldEntry::new(30).encode_value(&mut enc, &UInt(size)).unwrap();
        FieldList::encode_complete(&mut enc, true).unwrap();
        Map::encode_entry_complete(&mut enc, true).unwrap();
    }
    Map::encode_complete(&mut enc, true).unwrap();
    Msg::encode_complete(&mut enc, true).unwrap();
    let written = enc.position();
    buf.truncate(written);

    // decode side: walk the whole thing back
    let mut dec = DecodeIter::new(&buf, WireVersion::CURRENT);
    let decoded = Msg::decode(&mut dec).unwrap();
    let refresh = match decoded {
        Msg::Refresh(m) => m,
        other => panic!("wrong class: {other:?}"),
    };
    assert_eq!(refresh.base.container_type, DataType::Map);
    assert_eq!(refresh.base.msg_key.unwrap().name, Some(&b"BB.TO"[..]));

    let mut map = Map::new(DataType::Unknown, DataType::Unknown);
    assert_eq!(map.decode_init(&mut dec).unwrap(), InitOutcome::Ready);
    assert_eq!(map.key_field_id, Some(22));
    assert_eq!(map.total_count_hint, Some(2));
    let decoded_db = LocalFieldSetDefDb::decode(map.set_defs.unwrap()).unwrap();

    // summary in place
    let mut summary = FieldList::new();
    summary.decode_init(&mut dec, None).unwrap();
    let currency = FieldEntry::decode(&mut dec).unwrap().unwrap();
    assert_eq!(currency.field_id, 15);
    assert!(FieldEntry::decode(&mut dec).unwrap().is_none());

    let mut levels = Vec::new();
    while let Some(entry) = map.decode_entry(&mut dec).unwrap() {
        assert_eq!(entry.action, MapEntryAction::Add);
        let key = entry.decode_key::<Real>().unwrap().expect_value();
        let mut list = FieldList::new();
        assert_eq!(
            list.decode_init(&mut dec, Some(&decoded_db)).unwrap(),
            InitOutcome::Ready
        );
        let price = FieldEntry::decode(&mut dec).unwrap().unwrap();
        let size = FieldEntry::decode(&mut dec).unwrap().unwrap();
        assert!(FieldEntry::decode(&mut dec).unwrap().is_none());
        let price = decode_from_span::<Real>(price.data).unwrap().expect_value();
        let size = decode_from_span::<UInt>(size.data).unwrap().expect_value();
        assert_eq!(price, key);
        levels.push((price.mantissa, size.0));
    }
    assert_eq!(levels, vec![(1025, 500), (1050, 1200)]);
}

#[test]
fn delete_entry_with_blank_fields_is_normal_control_flow() {
    let mut buf = [0u8; 256];
    let mut enc = EncodeIter::new(&mut buf, WireVersion::CURRENT);
    let map = Map::new(DataType::Real, DataType::FieldList);
    map.encode_init(&mut enc).unwrap();
    map.encode_entry(
        &mut enc,
        MapEntryAction::Delete,
        &Real::new(999, RealHint::ExponentNeg2),
        None,
        b"",
    )
    .unwrap();
    Map::encode_complete(&mut enc, true).unwrap();
    let written = enc.position();

    let mut dec = DecodeIter::new(&buf[..written], WireVersion::CURRENT);
    let mut map = Map::new(DataType::Unknown, DataType::Unknown);
    map.decode_init(&mut dec).unwrap();
    let entry = map.decode_entry(&mut dec).unwrap().unwrap();
    assert_eq!(entry.action, MapEntryAction::Delete);
    // a blind payload decode on the empty span reports blank, not an error
    assert!(decode_from_span::<UInt>(entry.data).unwrap().is_blank());
    assert!(map.decode_entry(&mut dec).unwrap().is_none());
}
