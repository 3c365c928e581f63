use httptest::matchers::request;
use httptest::responders::status_code;
use httptest::{Expectation, Server};
use tempfile::tempdir;

use order_desk::{AppConfig, BookingStore, LoadPhase, OrderDesk, Sheet, SlotSelection};

const ORDERS_CSV: &str = "Timestamp,Listing,Username,Order,1st Payment,2nd Payment,Final Payment,Status,Deadline\n\
1,Plush Set,@amy,1,paid,paid,,Ready for collection,3/4/2025\n\
2,Plush Set,@bob,2,paid,unpaid,,Ready for collection,\n\
3,Plush Set,@cat,1,paid,,,At KADD,\n\
4,Poster,@amy,1,paid,,,OTW to SG,\n\
5,\"Badge, Gold\",@AMY,1,paid,paid,paid,ready for collection,-\n\
6,Poster,@dan,1,unpaid,,,,\n\
7,Keychain,@amy,1,paid,,,At CADD,\n\
8,Keychain,@eve,1,paid,,,At CADD,\n";

const MEETUP_CSV: &str = "Date,Location,Time,Type,Slots\n\
12/5/2025,Bishan MRT,7pm,Meetup,3\n\
13/5/2025,Home,2pm - 6pm,Self Collect,\n\
14/5/2025,,1pm,Meetup,2\n";

#[tokio::test]
async fn relay_fallback_through_booking() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/orders"))
            .times(1)
            .respond_with(status_code(500)),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/relay-one"))
            .times(1)
            .respond_with(status_code(502)),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/relay-two"))
            .times(1)
            .respond_with(status_code(200).body(ORDERS_CSV)),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/meetup"))
            .times(1)
            .respond_with(status_code(200).body(MEETUP_CSV)),
    );

    let data_dir = tempdir().unwrap();
    let config = AppConfig {
        orders_sheet_url: server.url_str("/orders?output=csv"),
        meetup_sheet_url: server.url_str("/meetup?output=csv"),
        relay_routes: vec![
            format!("{}?url=", server.url_str("/relay-one")),
            format!("{}?url=", server.url_str("/relay-two")),
        ],
        retry_count: 0,
        booking_data_dir: data_dir.path().to_path_buf(),
        ..AppConfig::default()
    };
    let desk = OrderDesk::new(config).unwrap();

    let summary = desk.listing_summary().await.unwrap();
    assert_eq!(desk.phase(Sheet::Orders), LoadPhase::Loaded);
    let listings: Vec<(&str, &str)> = summary
        .iter()
        .map(|entry| (entry.listing.as_str(), entry.status.as_str()))
        .collect();
    // the first rows after the header are skipped by the summary
    assert_eq!(
        listings,
        vec![
            ("Badge, Gold", "ready for collection"),
            ("Keychain", "At CADD"),
            ("Poster", "ordered"),
        ]
    );

    let orders = desk.orders_for("@Amy").await.unwrap();
    assert_eq!(orders.len(), 4);

    let slots = desk.slots().await.unwrap();
    assert_eq!(slots.meetup.len(), 1);
    assert_eq!(slots.self_collect.len(), 1);

    let reference = slots.meetup[0].booking_reference(&desk.config().booking_page);
    let selection = SlotSelection::from_query(&reference).unwrap();
    assert_eq!(selection.location, "Bishan MRT");

    let ready = desk.ready_for_collection(&selection, "@amy").await.unwrap();
    assert_eq!(ready, vec!["Plush Set", "Badge, Gold"]);

    let store = BookingStore::open(&desk.config().booking_data_dir).unwrap();
    let booking = desk
        .confirm_booking(&store, &selection, "@amy", &ready)
        .await
        .unwrap();
    assert_eq!(booking.listings, "Plush Set, Badge, Gold");
    assert_eq!(booking.slot_type, "meetup");
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.last().unwrap(), Some(booking));
}
