//! Reply Parsing and Prompt Rendering Benchmarks
//!
//! Both run once per loop iteration, so they sit on the hot path of every
//! orchestration call alongside the completion and database round-trips.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use nlquery::{build_system_prompt, parse_reply, ColumnInfo, EngineFamily, ForeignKeyInfo, SchemaInfo, TableInfo};

fn wide_schema(tables: usize, columns: usize) -> SchemaInfo {
    SchemaInfo::Relational {
        tables: (0..tables)
            .map(|t| TableInfo {
                name: format!("table_{t}"),
                columns: (0..columns)
                    .map(|c| ColumnInfo {
                        name: format!("column_{c}"),
                        data_type: if c == 0 { "bigint".to_string() } else { "varchar(255)".to_string() },
                        nullable: c != 0,
                        is_primary_key: c == 0,
                        comment: (c % 5 == 0).then(|| format!("column {c} of table {t}")),
                    })
                    .collect(),
                primary_keys: vec!["column_0".to_string()],
                foreign_keys: (t > 0)
                    .then(|| ForeignKeyInfo {
                        column: "column_1".to_string(),
                        referenced_table: format!("table_{}", t - 1),
                        referenced_column: "column_0".to_string(),
                    })
                    .into_iter()
                    .collect(),
            })
            .collect(),
    }
}

fn bench_parse_reply(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_reply");

    let well_formed = "ACTION: QUERY\nSQL: SELECT COUNT(*) FROM users WHERE active = 1\nREASONING: count the active users";
    group.bench_function("well_formed_query", |b| b.iter(|| parse_reply(black_box(well_formed))));

    let fenced = "Sure, let me look that up.\n\n```sql\nSELECT u.id, u.email, COUNT(o.id)\nFROM users u\nJOIN orders o ON o.user_id = u.id\nGROUP BY u.id, u.email\nORDER BY 3 DESC\nLIMIT 10;\n```\n";
    group.bench_function("fenced_query", |b| b.iter(|| parse_reply(black_box(fenced))));

    let answer = "ACTION: ANSWER\nRESPONSE: The ten customers with the most orders are listed below.\n".repeat(20);
    group.bench_function("long_answer", |b| b.iter(|| parse_reply(black_box(&answer))));

    group.finish();
}

fn bench_system_prompt(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_system_prompt");

    for (tables, columns) in [(10, 8), (200, 20)] {
        let schema = wide_schema(tables, columns);
        group.bench_function(format!("{tables}x{columns}"), |b| {
            b.iter(|| build_system_prompt(black_box(&schema), EngineFamily::Postgres));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parse_reply, bench_system_prompt);
criterion_main!(benches);
