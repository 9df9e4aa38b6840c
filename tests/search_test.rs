//! Integration tests for run search: filter parsing, matching, ordering and
//! pagination.

use tempfile::TempDir;
use trackstore::{
    CreateRun, ErrorCode, FileStore, Filter, Metric, Param, Run, RunTag, ViewType,
    DEFAULT_EXPERIMENT_ID, SEARCH_MAX_RESULTS_THRESHOLD,
};

fn make_store(tmp: &TempDir) -> FileStore {
    FileStore::new(tmp.path()).expect("failed to open store")
}

fn make_run(store: &FileStore, experiment_id: &str, start_time: i64) -> Run {
    store
        .create_run(
            experiment_id,
            CreateRun {
                user_id: "user".to_string(),
                start_time,
                ..Default::default()
            },
        )
        .expect("failed to create run")
}

fn search_ids(store: &FileStore, experiment_ids: &[&str], filter: &str) -> Vec<String> {
    let filter = Filter::parse(filter).expect("filter should parse");
    store
        .search_runs(experiment_ids, Some(&filter), ViewType::ActiveOnly, 1000)
        .expect("search failed")
        .into_iter()
        .map(|run| run.info.run_id)
        .collect()
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

#[test]
fn test_filter_parse_errors() {
    let bad = [
        "",                                    // no clauses
        "params.p > 'v'",                      // ordering comparator on a string
        "tags.t < 'v'",
        "metrics.m = 'str'",                   // metric compared to a string
        "params.p = unquoted",                 // unquoted string value
        "params.p = 4",                        // param compared to a number
        "tags.t = 'a' OR tags.t = 'b'",        // OR is not in the grammar
        "badentity.k = 'v'",                   // unknown entity
        "attributes.bogus = 'v'",              // unknown attribute
        "bogus = 'v'",                         // unknown bare attribute
        "name > 'x'",                          // ordering comparator on a string attribute
        "status = RUNNING",                    // unquoted attribute value
        "metrics.m ~ 3",                       // unknown comparator
        "params.p = 'unterminated",            // unterminated quote
        "params.p = 'a' tags.t = 'b'",         // missing AND
    ];
    for filter in bad {
        let err = Filter::parse(filter).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParameterValue, "filter {filter:?}");
    }
}

#[test]
fn test_filter_parse_accepts_entity_aliases_and_quoted_keys() {
    let good = [
        "metric.m > 1",
        "metrics.m > 1",
        "param.p = 'v'",
        "parameters.p != 'v'",
        "tag.t = 'v'",
        "tags.`weird/key` = 'v'",
        "tags.\"quoted key\" = 'v'",
        "attributes.status = 'RUNNING'",
        "run.start_time >= 0",
        "start_time > 100 AND metrics.acc >= 0.9 and params.model = 'resnet'",
    ];
    for filter in good {
        assert!(Filter::parse(filter).is_ok(), "filter {filter:?}");
    }
}

// ─── Matching ────────────────────────────────────────────────────────────────

#[test]
fn test_search_by_tags() {
    let tmp = TempDir::new().unwrap();
    let store = make_store(&tmp);
    let exp = store.create_experiment("search_tags").unwrap();

    let r1 = make_run(&store, &exp, 10).info.run_id;
    let r2 = make_run(&store, &exp, 20).info.run_id;
    let untagged = make_run(&store, &exp, 30).info.run_id;
    for run_id in [&r1, &r2] {
        store
            .set_tag(run_id, RunTag::new("generic_tag", "p_val"))
            .unwrap();
    }
    store
        .set_tag(&r1, RunTag::new("generic_2", "some value"))
        .unwrap();
    store
        .set_tag(&r2, RunTag::new("generic_2", "another value"))
        .unwrap();

    let ids = |filter: &str| search_ids(&store, &[&exp], filter);
    let mut both = ids("tags.generic_tag = 'p_val'");
    both.sort();
    let mut expected = vec![r1.clone(), r2.clone()];
    expected.sort();
    assert_eq!(both, expected);

    assert!(ids("tags.generic_tag = 'wrong_val'").is_empty());
    // A run lacking the tag never matches, not even under !=.
    assert!(ids("tags.generic_tag != 'p_val'").is_empty());
    assert_eq!(ids("tags.generic_2 != 'some value'"), vec![r2.clone()]);
    assert_eq!(ids("tags.generic_2 = 'another value'"), vec![r2.clone()]);
    let _ = untagged;
}

#[test]
fn test_search_by_params() {
    let tmp = TempDir::new().unwrap();
    let store = make_store(&tmp);
    let exp = store.create_experiment("search_params").unwrap();

    let r1 = make_run(&store, &exp, 10).info.run_id;
    let r2 = make_run(&store, &exp, 20).info.run_id;
    store.log_param(&r1, Param::new("model", "resnet")).unwrap();
    store.log_param(&r2, Param::new("model", "vgg")).unwrap();

    assert_eq!(search_ids(&store, &[&exp], "params.model = 'resnet'"), vec![r1.clone()]);
    assert_eq!(search_ids(&store, &[&exp], "params.model != 'resnet'"), vec![r2]);
    assert!(search_ids(&store, &[&exp], "params.missing = 'resnet'").is_empty());
}

#[test]
fn test_search_by_metrics_uses_current_value() {
    let tmp = TempDir::new().unwrap();
    let store = make_store(&tmp);
    let exp = store.create_experiment("search_metrics").unwrap();

    let low = make_run(&store, &exp, 10).info.run_id;
    let high = make_run(&store, &exp, 20).info.run_id;
    store.log_metric(&low, Metric::new("acc", 0.4, 100, 0)).unwrap();
    // The current value is the max sample, so the early 0.2 is invisible.
    store.log_metric(&high, Metric::new("acc", 0.2, 100, 0)).unwrap();
    store.log_metric(&high, Metric::new("acc", 0.9, 200, 1)).unwrap();

    assert_eq!(search_ids(&store, &[&exp], "metrics.acc > 0.5"), vec![high.clone()]);
    assert_eq!(search_ids(&store, &[&exp], "metrics.acc >= 0.9"), vec![high.clone()]);
    assert_eq!(search_ids(&store, &[&exp], "metrics.acc < 0.5"), vec![low.clone()]);
    assert_eq!(search_ids(&store, &[&exp], "metrics.acc <= 0.4"), vec![low.clone()]);
    assert_eq!(search_ids(&store, &[&exp], "metrics.acc = 0.4"), vec![low]);
    assert_eq!(search_ids(&store, &[&exp], "metrics.acc != 0.4"), vec![high]);
    assert!(search_ids(&store, &[&exp], "metrics.nope > 0").is_empty());
}

#[test]
fn test_search_conjunction() {
    let tmp = TempDir::new().unwrap();
    let store = make_store(&tmp);
    let exp = store.create_experiment("search_and").unwrap();

    let hit = make_run(&store, &exp, 10).info.run_id;
    let miss = make_run(&store, &exp, 20).info.run_id;
    for run_id in [&hit, &miss] {
        store.log_param(run_id, Param::new("model", "resnet")).unwrap();
    }
    store.log_metric(&hit, Metric::new("acc", 0.95, 100, 0)).unwrap();
    store.log_metric(&miss, Metric::new("acc", 0.5, 100, 0)).unwrap();

    assert_eq!(
        search_ids(&store, &[&exp], "params.model = 'resnet' AND metrics.acc > 0.9"),
        vec![hit]
    );
}

#[test]
fn test_search_by_attributes() {
    let tmp = TempDir::new().unwrap();
    let store = make_store(&tmp);
    let exp = store.create_experiment("search_attrs").unwrap();

    let r1 = make_run(&store, &exp, 100).info.run_id;
    let r2 = make_run(&store, &exp, 200).info.run_id;

    assert_eq!(
        search_ids(&store, &[&exp], "start_time > 150"),
        vec![r2.clone()]
    );
    let mut all = search_ids(&store, &[&exp], "status = 'RUNNING'");
    all.sort();
    let mut expected = vec![r1.clone(), r2.clone()];
    expected.sort();
    assert_eq!(all, expected);
    assert!(search_ids(&store, &[&exp], "status != 'RUNNING'").is_empty());
    assert_eq!(
        search_ids(&store, &[&exp], &format!("attributes.run_id = '{r1}'")),
        vec![r1]
    );
    // end_time is unset on running runs; the clause cannot match.
    assert!(search_ids(&store, &[&exp], "end_time >= 0").is_empty());
}

#[test]
fn test_search_with_quoted_key_containing_separator() {
    let tmp = TempDir::new().unwrap();
    let store = make_store(&tmp);
    let exp = store.create_experiment("search_quoted").unwrap();
    let run_id = make_run(&store, &exp, 10).info.run_id;
    store
        .set_tag(&run_id, RunTag::new("weird/but valid key", "yes"))
        .unwrap();

    assert_eq!(
        search_ids(&store, &[&exp], "tags.`weird/but valid key` = 'yes'"),
        vec![run_id]
    );
}

// ─── View type, ordering, pagination ─────────────────────────────────────────

#[test]
fn test_search_respects_view_type() {
    let tmp = TempDir::new().unwrap();
    let store = make_store(&tmp);
    let exp = store.create_experiment("search_view").unwrap();

    let active = make_run(&store, &exp, 10).info.run_id;
    let deleted = make_run(&store, &exp, 20).info.run_id;
    store.delete_run(&deleted).unwrap();

    let ids = |view| {
        store
            .search_runs(&[exp.as_str()], None, view, 1000)
            .unwrap()
            .into_iter()
            .map(|run| run.info.run_id)
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(ViewType::ActiveOnly), vec![active.clone()]);
    assert_eq!(ids(ViewType::DeletedOnly), vec![deleted]);
    assert_eq!(ids(ViewType::All).len(), 2);
}

#[test]
fn test_search_ordering_is_deterministic() {
    let tmp = TempDir::new().unwrap();
    let store = make_store(&tmp);
    let exp = store.create_experiment("search_order").unwrap();

    let older = make_run(&store, &exp, 100).info.run_id;
    let newer = make_run(&store, &exp, 200).info.run_id;
    let mut tied = vec![
        make_run(&store, &exp, 150).info.run_id,
        make_run(&store, &exp, 150).info.run_id,
    ];
    tied.sort();
    let in_default = make_run(&store, DEFAULT_EXPERIMENT_ID, 999).info.run_id;

    let results = store
        .search_runs(&[&exp, DEFAULT_EXPERIMENT_ID], None, ViewType::ActiveOnly, 1000)
        .unwrap()
        .into_iter()
        .map(|run| run.info.run_id)
        .collect::<Vec<_>>();
    // Start time descending, ties broken by run id ascending, and runs from
    // the default experiment always sort last.
    assert_eq!(
        results,
        vec![newer, tied[0].clone(), tied[1].clone(), older, in_default]
    );
}

#[test]
fn test_search_pagination_returns_stable_prefixes() {
    let tmp = TempDir::new().unwrap();
    let store = make_store(&tmp);
    let exp = store.create_experiment("search_page").unwrap();
    for start_time in 0..10 {
        make_run(&store, &exp, start_time);
    }

    let full = store
        .search_runs(&[exp.as_str()], None, ViewType::ActiveOnly, 1000)
        .unwrap();
    assert_eq!(full.len(), 10);
    for n in [0, 1, 2, 4, 8, 10, 20] {
        let page = store
            .search_runs(&[exp.as_str()], None, ViewType::ActiveOnly, n)
            .unwrap();
        assert_eq!(page, full[..n.min(10)].to_vec(), "page size {n}");
    }
}

#[test]
fn test_search_max_results_threshold() {
    let tmp = TempDir::new().unwrap();
    let store = make_store(&tmp);

    // The threshold itself is legal.
    store
        .search_runs(
            &[DEFAULT_EXPERIMENT_ID],
            None,
            ViewType::ActiveOnly,
            SEARCH_MAX_RESULTS_THRESHOLD,
        )
        .unwrap();

    let err = store
        .search_runs(
            &[DEFAULT_EXPERIMENT_ID],
            None,
            ViewType::ActiveOnly,
            SEARCH_MAX_RESULTS_THRESHOLD + 1,
        )
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidParameterValue);
    assert!(err.to_string().contains("max_results"));
}
