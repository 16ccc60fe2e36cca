mod common;

use common::{MockClient, row};
use pgmeta::{FromRow, Value};

pgmeta::entity! {
    #[table = "grades"]
    pub struct Grade / GradeField {
        #[pk] pub id: i32 => Id("int4"),
        pub title: String => Title("text"),
    }
}

pgmeta::entity! {
    #[table = "classmates"]
    pub struct Classmate / ClassmateField {
        #[pk] pub id: i64 => Id("int8"),
        pub name: String => Name("text"),
        #[nullable] pub grade_id: Option<i32> => GradeId("int4"),
    }
    relations {
        grade: Grade = grade_id,
    }
}

fn classmate(grade_id: Option<i32>) -> Classmate {
    Classmate::from_row(&row(&[
        ("id", Value::I64(1)),
        ("name", Value::from("Ada")),
        ("grade_id", Value::from(grade_id)),
    ]))
    .unwrap()
}

#[tokio::test]
async fn accessor_fetches_once_per_instance() {
    let db = MockClient::new();
    db.respond(
        "FROM grades",
        vec![row(&[("id", Value::I32(3)), ("title", Value::from("Third"))])],
    );

    let c = classmate(Some(3));
    assert!(!c.grade.is_loaded());

    let first = c.grade(&db).await.unwrap().cloned();
    let second = c.grade(&db).await.unwrap().cloned();

    assert_eq!(db.count_matching("FROM grades"), 1);
    assert_eq!(first, second);
    assert_eq!(first.map(|g| g.title), Some("Third".to_string()));
    assert_eq!(
        db.statements()[0],
        "SELECT a.id, a.title FROM grades a WHERE a.id = $1 LIMIT 1"
    );
    assert_eq!(db.params(0), vec![Value::I32(3)]);
}

#[tokio::test]
async fn missing_related_row_is_cached_too() {
    let db = MockClient::new();
    let c = classmate(Some(99));

    assert!(c.grade(&db).await.unwrap().is_none());
    assert!(c.grade(&db).await.unwrap().is_none());
    assert_eq!(db.count_matching("FROM grades"), 1);
    assert_eq!(c.grade.get(), Some(None));
}

#[tokio::test]
async fn null_foreign_key_needs_no_lookup() {
    let db = MockClient::new();
    let c = classmate(None);

    assert!(c.grade(&db).await.unwrap().is_none());
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn separate_instances_keep_separate_caches() {
    let db = MockClient::new();
    db.respond(
        "FROM grades",
        vec![row(&[("id", Value::I32(3)), ("title", Value::from("Third"))])],
    );

    let a = classmate(Some(3));
    let b = a.clone();
    a.grade(&db).await.unwrap();
    b.grade(&db).await.unwrap();
    a.grade(&db).await.unwrap();
    assert_eq!(db.count_matching("FROM grades"), 2);
}

#[tokio::test]
async fn failed_lookup_is_retried() {
    let db = MockClient::new();
    db.fail_on("FROM grades", "connection reset");
    let c = classmate(Some(3));

    assert!(c.grade(&db).await.is_err());
    assert!(!c.grade.is_loaded());
}

#[tokio::test]
async fn concurrent_accessors_share_one_lookup() {
    let db = MockClient::new();
    db.respond(
        "FROM grades",
        vec![row(&[("id", Value::I32(3)), ("title", Value::from("Third"))])],
    );
    let c = classmate(Some(3));

    let loaded = futures_util::future::join_all((0..4).map(|_| c.grade(&db))).await;
    assert!(loaded.iter().all(|g| matches!(g, Ok(Some(g)) if g.id == 3)));
    assert_eq!(db.count_matching("FROM grades"), 1);
}
