//! Cross-builder tests for the qb module.

use crate::error::UsageError;
use crate::exec::Shape;
use crate::qb::{
    Filter, JoinKind, SqlQb, delete_from, insert_into, select, select_from, select_sub, update,
    update_table,
};
use crate::{Value, args, col};

crate::entity! {
    #[table = "grades"]
    pub struct Grade / GradeField {
        #[pk] pub id: i32 => Id("int4"),
        pub title: String => Title("text"),
    }
}

crate::entity! {
    #[table = "classmates"]
    pub struct Classmate / ClassmateField {
        #[pk] pub id: i64 => Id("int8"),
        pub name: String => Name("text"),
        #[nullable] pub grade_id: Option<i32> => GradeId("int4"),
        pub enrolled: bool => Enrolled("bool"),
    }
}

fn placeholders(sql: &str) -> Vec<usize> {
    let mut out = Vec::new();
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if let Ok(n) = sql[start..end].parse() {
                out.push(n);
            }
            i = end;
        } else {
            i += 1;
        }
    }
    out
}

#[test]
fn test_mutations_without_where_always_fail() {
    let variants = [
        update_table("t", "t").assemble(),
        update_table("t", "t").set("x", 1).assemble(),
        update_table("t", "t")
            .set("x", 1)
            .set_raw("y", "now()")
            .bind_named("n", 1)
            .assemble_for(Shape::List),
        update_table("t", "t").where_tpl("x = {9}", args![]).assemble(),
        delete_from("t", "t").assemble(),
        delete_from("t", "t").bind_named("n", 2).assemble_for(Shape::One),
    ];
    for result in variants {
        let err = result.unwrap_err();
        // A malformed template is deferred and never becomes a predicate.
        assert_eq!(err.usage(), Some(&UsageError::MissingWhere), "{err}");
    }
}

#[test]
fn test_update_with_empty_set_fails() {
    let variants = [
        update_table("t", "t").eq("t.id", 1).assemble(),
        update_table("t", "t")
            .eq("t.id", 1)
            .set_opt("x", None::<i32>)
            .set_if(false, "y", 2)
            .assemble(),
        update::<Classmate>().where_pk(1i64).assemble(),
    ];
    for result in variants {
        assert_eq!(result.unwrap_err().usage(), Some(&UsageError::MissingSet));
    }
}

#[test]
fn test_where_template_with_limit() {
    let a = select_from("people", "p")
        .where_tpl("p.age >= {0}", args![18])
        .limit(1)
        .assemble()
        .unwrap();
    assert_eq!(a.params.len(), 1);
    assert_eq!(a.params[0].value, Value::I32(18));
    assert_eq!(placeholders(&a.sql), vec![1]);
    assert_eq!(a.sql.matches("LIMIT 1").count(), 1);
}

#[test]
fn test_placeholders_follow_text_order() {
    // Clauses added out of text order still number left to right.
    let a = select::<Classmate>()
        .order_by(ClassmateField::Name)
        .limit(5)
        .gt(ClassmateField::Id, 10i64)
        .join(
            JoinKind::Left,
            "grades",
            "g",
            crate::Fragment::template("g.id = a.grade_id AND g.title != {0}", args!["none"]).unwrap(),
        )
        .in_list(ClassmateField::GradeId, [1, 2, 3])
        .assemble()
        .unwrap();

    let seen = placeholders(&a.sql);
    assert_eq!(seen, (1..=seen.len()).collect::<Vec<_>>());
    assert_eq!(a.params[0].value, Value::Text("none".into()));
    assert_eq!(a.params[1].value, Value::I64(10));

    let names: Vec<&str> = a.params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["p1", "p2", "p3", "p4", "p5"]);
}

#[test]
fn test_placeholder_numbering_is_independent_of_call_path() {
    let by_helpers = select_from("t", "t")
        .eq("t.a", 1)
        .between("t.b", 2, 3)
        .assemble()
        .unwrap();
    let by_template = select_from("t", "t")
        .where_tpl("t.a = {0} AND t.b BETWEEN {1} AND {2}", args![1, 2, 3])
        .assemble()
        .unwrap();
    assert_eq!(by_helpers.sql, by_template.sql);
    assert_eq!(by_helpers.params, by_template.params);
}

#[test]
fn test_union_members_are_standalone_statements() {
    let a = select_from("people", "p").fields("p.id").eq("p.active", true);
    let b = select_from("archived", "x").fields("x.id").lt("x.year", 2020);
    let sql = a.union(b).to_sql().unwrap();

    let members: Vec<&str> = sql.split(" UNION ").collect();
    assert_eq!(members.len(), 2);
    assert_eq!(members[0], "SELECT p.id FROM people p WHERE p.active = $1");
    assert_eq!(members[1], "SELECT x.id FROM archived x WHERE x.year < $2");
}

#[test]
fn test_sub_select_source_and_join() {
    let latest = select_from("grades", "g").fields("g.id").eq("g.title", "A");
    let a = select_sub(latest.clone(), "l")
        .join_sub(JoinKind::Inner, latest, "m", "m.id = l.id")
        .assemble()
        .unwrap();
    assert_eq!(
        a.sql,
        "SELECT * FROM (SELECT g.id FROM grades g WHERE g.title = $1) l \
         INNER JOIN (SELECT g.id FROM grades g WHERE g.title = $2) m ON m.id = l.id"
    );
}

#[test]
fn test_named_parameter_shared_across_clauses() {
    let a = select_from("events", "e")
        .where_tpl("e.starts_at >= {since}", args![])
        .where_tpl("e.ends_at >= {since} OR e.open", args![])
        .bind_named("since", 100)
        .assemble()
        .unwrap();
    assert_eq!(
        a.sql,
        "SELECT * FROM events e WHERE (e.starts_at >= $1) AND (e.ends_at >= $1 OR e.open)"
    );
    assert_eq!(a.params.len(), 1);
    assert_eq!(a.params[0].name, "since");
}

#[test]
fn test_undeclared_named_parameter_dangles() {
    let err = select_from("events", "e")
        .where_tpl("e.id = {missing}", args![])
        .assemble()
        .unwrap_err();
    assert!(matches!(err.usage(), Some(UsageError::DanglingPlaceholder(_))));
}

#[test]
fn test_or_group_and_where_any() {
    let sql = select::<Classmate>()
        .eq(ClassmateField::Enrolled, true)
        .or_group(|g| g.is_null(ClassmateField::GradeId).eq(ClassmateField::GradeId, 1))
        .where_any("a.name ILIKE {0}", args!["a%", "b%"])
        .to_sql()
        .unwrap();
    assert!(sql.ends_with(
        "WHERE a.enrolled = $1 AND (a.grade_id IS NULL OR a.grade_id = $2) \
         AND (a.name ILIKE $3 OR a.name ILIKE $4)"
    ));
}

#[test]
fn test_columns_from_other_aliases() {
    let sql = select::<Classmate>()
        .join_entity::<Grade>(JoinKind::Inner, "g", "g.id = a.grade_id", false)
        .eq(col("g", GradeField::Title), "B")
        .group_by(ClassmateField::GradeId)
        .fields("a.grade_id, count(1)")
        .to_sql()
        .unwrap();
    assert_eq!(
        sql,
        "SELECT a.grade_id, count(1) FROM classmates a INNER JOIN grades g ON g.id = a.grade_id \
         WHERE g.title = $1 GROUP BY a.grade_id"
    );
}

#[test]
fn test_insert_returning_all_columns() {
    let a = insert_into("grades").set("title", "C").assemble().unwrap();
    assert_eq!(a.sql, "INSERT INTO grades (title) VALUES ($1) RETURNING *");
}
