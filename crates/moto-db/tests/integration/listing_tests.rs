use std::time::Duration;

use moto_core::models::{
    ListingAttributes, ListingFilter, ListingPatch, ListingStatus, NewListing, Quantity,
};
use moto_core::traits::ListingStore;
use moto_core::{AppError, ListingService};
use moto_db::{Database, DatabaseConfig, ListingRepository};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::integration::common::{connection_string, setup_test_db};

fn draft(title: &str) -> NewListing {
    NewListing {
        title: title.into(),
        price: Decimal::ZERO,
        currency: "RUB".into(),
        attributes: Some(ListingAttributes {
            year: Some(2021),
            mileage: Some(Quantity::new(15000, "км")),
            displacement: Some(Quantity::new(471, "сс")),
            ..Default::default()
        }),
        status: ListingStatus::Draft,
        source_url: "https://jmmoto.ru/moto/cb500x".into(),
    }
}

#[tokio::test]
async fn create_and_load_listing() {
    let (pool, _container) = setup_test_db().await;
    let repo = ListingRepository::new(pool);

    let id = repo.create(&draft("Honda CB500X 2021")).await.unwrap();
    assert!(!id.is_nil());

    let found = repo.filter(&ListingFilter::by_id(id)).await.unwrap();
    assert_eq!(found.len(), 1);
    let listing = &found[0];
    assert_eq!(listing.title, "Honda CB500X 2021");
    assert_eq!(listing.price, Decimal::ZERO);
    assert_eq!(listing.currency, "RUB");
    assert_eq!(listing.status, ListingStatus::Draft);
    assert_eq!(listing.source_url, "https://jmmoto.ru/moto/cb500x");
    let attrs = listing.attributes.clone().unwrap();
    assert_eq!(attrs.year, Some(2021));
    assert_eq!(attrs.mileage, Some(Quantity::new(15000, "км")));
    assert_eq!(attrs.arrival_date, None);
    assert!(listing.photos.is_empty());
}

#[tokio::test]
async fn listing_without_attributes_round_trips_as_none() {
    let (pool, _container) = setup_test_db().await;
    let repo = ListingRepository::new(pool);

    let mut new = draft("");
    new.attributes = None;
    let id = repo.create(&new).await.unwrap();

    let listing = repo.filter(&ListingFilter::by_id(id)).await.unwrap().remove(0);
    assert_eq!(listing.title, "");
    assert!(listing.attributes.is_none());
}

#[tokio::test]
async fn photos_are_appended_after_highest_position() {
    let (pool, _container) = setup_test_db().await;
    let repo = ListingRepository::new(pool);
    let id = repo.create(&draft("Yamaha MT-07 2019")).await.unwrap();

    let first = repo
        .add_photos(id, &["https://cdn.test/a".into(), "https://cdn.test/b".into()])
        .await
        .unwrap();
    let positions: Vec<_> = first.iter().map(|p| p.position).collect();
    assert_eq!(positions, vec![0, 1]);

    let second = repo
        .add_photos(id, &["https://cdn.test/c".into()])
        .await
        .unwrap();
    assert_eq!(second[0].position, 2);
    assert_eq!(second[0].listing_id, id);

    let listing = repo.filter(&ListingFilter::by_id(id)).await.unwrap().remove(0);
    let urls: Vec<_> = listing.photos.iter().map(|p| p.url.as_str()).collect();
    assert_eq!(
        urls,
        vec!["https://cdn.test/a", "https://cdn.test/b", "https://cdn.test/c"]
    );
}

#[tokio::test]
async fn concurrent_photo_batches_never_share_a_position() {
    let (pool, _container) = setup_test_db().await;
    let repo = ListingRepository::new(pool);
    let id = repo.create(&draft("Suzuki V-Strom 650 2020")).await.unwrap();

    let batch = |prefix: &str| -> Vec<String> {
        (0..3).map(|i| format!("https://cdn.test/{prefix}{i}")).collect()
    };
    let (a, b) = (batch("a"), batch("b"));
    let (left, right) = tokio::join!(repo.add_photos(id, &a), repo.add_photos(id, &b));
    left.unwrap();
    right.unwrap();

    let listing = repo.filter(&ListingFilter::by_id(id)).await.unwrap().remove(0);
    let positions: Vec<_> = listing.photos.iter().map(|p| p.position).collect();
    assert_eq!(positions, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn add_photos_to_missing_listing_is_not_found() {
    let (pool, _container) = setup_test_db().await;
    let repo = ListingRepository::new(pool);

    let err = repo
        .add_photos(Uuid::new_v4(), &["https://cdn.test/a".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn publish_merges_arrival_date_and_guards_status() {
    let (pool, _container) = setup_test_db().await;
    let repo = ListingRepository::new(pool);
    let id = repo.create(&draft("Honda CB500X 2021")).await.unwrap();

    let publish = ListingPatch {
        arrival_date: Some("через неделю".into()),
        status: Some(ListingStatus::Available),
        expected_status: Some(ListingStatus::Draft),
        ..Default::default()
    };
    repo.patch(id, &publish).await.unwrap();

    let listing = repo.filter(&ListingFilter::by_id(id)).await.unwrap().remove(0);
    assert_eq!(listing.status, ListingStatus::Available);
    assert_eq!(listing.arrival_date(), Some("через неделю"));
    // Other attributes survive the merge.
    assert_eq!(listing.attributes.unwrap().year, Some(2021));

    let err = repo.patch(id, &publish).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{err:?}");

    let err = repo.patch(Uuid::new_v4(), &publish).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn arrival_date_creates_attribute_bag_when_missing() {
    let (pool, _container) = setup_test_db().await;
    let repo = ListingRepository::new(pool);
    let mut new = draft("Kawasaki Z650");
    new.attributes = None;
    let id = repo.create(&new).await.unwrap();

    let patch = ListingPatch {
        arrival_date: Some("15.07".into()),
        ..Default::default()
    };
    repo.patch(id, &patch).await.unwrap();

    let listing = repo.filter(&ListingFilter::by_id(id)).await.unwrap().remove(0);
    assert_eq!(
        listing.attributes,
        Some(ListingAttributes {
            arrival_date: Some("15.07".into()),
            ..Default::default()
        })
    );
}

#[tokio::test]
async fn filter_orders_by_status_then_newest() {
    let (pool, _container) = setup_test_db().await;
    let repo = ListingRepository::new(pool);

    let draft_id = repo.create(&draft("Draft bike")).await.unwrap();
    let sold_id = repo.create(&draft("Sold bike")).await.unwrap();
    let old_available = repo.create(&draft("Old available")).await.unwrap();
    let new_available = repo.create(&draft("New available")).await.unwrap();

    for (id, status) in [
        (sold_id, ListingStatus::Sold),
        (old_available, ListingStatus::Available),
        (new_available, ListingStatus::Available),
    ] {
        let patch = ListingPatch {
            status: Some(status),
            ..Default::default()
        };
        repo.patch(id, &patch).await.unwrap();
    }

    let all = repo.filter(&ListingFilter::default()).await.unwrap();
    let ids: Vec<_> = all.iter().map(|l| l.id).collect();
    assert_eq!(ids, vec![new_available, old_available, sold_id, draft_id]);

    let available = repo
        .filter(&ListingFilter::default().with_status(ListingStatus::Available))
        .await
        .unwrap();
    assert_eq!(available.len(), 2);

    let by_title = repo
        .filter(&ListingFilter {
            title: Some("SOLD".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_title.len(), 1);
    assert_eq!(by_title[0].id, sold_id);
}

#[tokio::test]
async fn filter_by_price_range() {
    let (pool, _container) = setup_test_db().await;
    let repo = ListingRepository::new(pool);

    let mut ids = Vec::new();
    for price in [300_000, 450_000, 900_000] {
        let id = repo.create(&draft("Bike")).await.unwrap();
        let patch = ListingPatch {
            price: Some(Decimal::from(price)),
            ..Default::default()
        };
        repo.patch(id, &patch).await.unwrap();
        ids.push(id);
    }

    let found = repo
        .filter(&ListingFilter {
            min_price: Some(Decimal::from(400_000)),
            max_price: Some(Decimal::from(900_000)),
            ..Default::default()
        })
        .await
        .unwrap();
    let mut found: Vec<_> = found.iter().map(|l| l.id).collect();
    found.sort();
    let mut expected = vec![ids[1], ids[2]];
    expected.sort();
    assert_eq!(found, expected);
}

#[tokio::test]
async fn delete_cascades_to_photos() {
    let (pool, _container) = setup_test_db().await;
    let repo = ListingRepository::new(pool.clone());
    let id = repo.create(&draft("Honda Africa Twin")).await.unwrap();
    repo.add_photos(id, &["https://cdn.test/a".into()]).await.unwrap();

    repo.delete(id).await.unwrap();

    assert!(repo.filter(&ListingFilter::by_id(id)).await.unwrap().is_empty());
    let orphans: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM listing_photos WHERE listing_id = $1")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(orphans, 0);

    let err = repo.delete(id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn service_flow_against_postgres() {
    let (pool, _container) = setup_test_db().await;
    let repo = ListingRepository::new(pool);
    let service = ListingService::new(repo.clone());
    let id = repo.create(&draft("Honda CB500X 2021")).await.unwrap();

    let priced = service.set_price(id, Decimal::new(4500005, 1)).await.unwrap();
    assert_eq!(priced.price, Decimal::new(4500005, 1));
    assert_eq!(priced.status, ListingStatus::Draft);

    let published = service.publish(id, "в наличии").await.unwrap();
    assert_eq!(published.status, ListingStatus::Available);
    assert_eq!(published.arrival_date(), Some("в наличии"));

    let reserved = service
        .change_status(id, ListingStatus::Reserved)
        .await
        .unwrap();
    assert_eq!(reserved.status, ListingStatus::Reserved);

    let err = service
        .change_status(id, ListingStatus::Draft)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));

    // Price of a public listing is no longer editable through the draft flow.
    let err = service.set_price(id, Decimal::from(1)).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn locked_listing_times_out_instead_of_hanging() {
    let (_pool, container) = setup_test_db().await;
    let config = DatabaseConfig {
        url: connection_string(&container).await,
        max_connections: 3,
        acquire_timeout: Duration::from_secs(5),
        statement_timeout: Duration::from_secs(1),
    };
    let db = Database::connect(&config).await.unwrap();
    let repo = db.listing_repo();
    let id = repo.create(&draft("Honda CB650R 2022")).await.unwrap();

    // Another session holds the row lock and never lets go.
    let mut holder = db.pool().begin().await.unwrap();
    sqlx::query("SELECT id FROM listings WHERE id = $1 FOR UPDATE")
        .bind(id)
        .execute(&mut *holder)
        .await
        .unwrap();

    let result = tokio::time::timeout(
        Duration::from_secs(15),
        repo.add_photos(id, &["https://cdn.test/a".into()]),
    )
    .await
    .expect("add_photos kept waiting on the locked row");
    let err = result.unwrap_err();
    assert!(matches!(err, AppError::Timeout(1)), "{err:?}");
    assert!(err.is_retryable());

    holder.rollback().await.unwrap();
    let listing = repo.filter(&ListingFilter::by_id(id)).await.unwrap().remove(0);
    assert!(listing.photos.is_empty());
}
