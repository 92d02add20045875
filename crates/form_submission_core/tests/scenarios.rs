//! End-to-end walks through single- and multi-page forms.

mod common;

use std::collections::BTreeMap;

use common::*;
use form_submission_core::security::GENERIC_VETO;
use form_submission_core::{
    ContainerId, ElementId, ElementSettings, ElementType, FieldValue, FormId, FormSettings,
    Intent, Outcome, PageInput, SubmissionStatus, SubmissionStore,
};
use similar_asserts::assert_eq;

fn single_page_form() -> form_submission_core::Form {
    form(
        1,
        vec![container(
            10,
            1,
            0,
            vec![text(
                100,
                10,
                ElementSettings {
                    required: true,
                    min_length: Some(3),
                    ..Default::default()
                },
            )],
        )],
        FormSettings::default(),
    )
}

fn two_page_form(settings: FormSettings) -> form_submission_core::Form {
    form(
        2,
        vec![
            container(20, 2, 0, vec![required_text(200, 20)]),
            container(21, 2, 1, vec![required_text(210, 21)]),
        ],
        settings,
    )
}

#[test_log::test(tokio::test)]
async fn empty_required_field_is_rejected_without_storing_values() {
    let harness = Harness::new(vec![single_page_form()]);

    let outcome = harness
        .engine
        .advance(FormId(1), None, Intent::Submit, input(&[(100, "")]))
        .await
        .unwrap();

    let Outcome::Rejected { submission, errors } = outcome else {
        panic!("expected Rejected");
    };
    assert_eq!(
        errors.fields.get(&ElementId(100)),
        Some(&vec!["This field is required.".to_string()])
    );
    assert!(errors.page.is_empty());
    assert!(submission.values.is_empty());
    assert_eq!(submission.current_container_id, Some(ContainerId(10)));

    let stored = harness.store.load(submission.id).await.unwrap();
    assert!(stored.values.is_empty());
    assert_eq!(stored.errors_for(ContainerId(10)), errors);
}

#[test_log::test(tokio::test)]
async fn valid_submit_on_single_page_completes() {
    let mut harness = Harness::new(vec![single_page_form()]);

    let outcome = harness
        .engine
        .advance(FormId(1), None, Intent::Submit, input(&[(100, "abc")]))
        .await
        .unwrap();

    let Outcome::Completed { submission } = outcome else {
        panic!("expected Completed");
    };
    assert_eq!(submission.status, SubmissionStatus::Completed);
    assert_eq!(
        submission.values,
        BTreeMap::from([(ElementId(100), FieldValue::Single("abc".to_string()))])
    );

    let event = harness.next_completion().await.expect("completion dispatched");
    assert_eq!(event.submission_id, submission.id);
    assert_eq!(event.form_id, FormId(1));
}

#[test_log::test(tokio::test)]
async fn next_then_prev_keeps_values_and_skips_validation() {
    let harness = Harness::new(vec![two_page_form(FormSettings::default())]);

    let outcome = harness
        .engine
        .advance(FormId(2), None, Intent::Next, input(&[(200, "first page")]))
        .await
        .unwrap();
    let Outcome::Navigated { submission, container } = outcome else {
        panic!("expected Navigated");
    };
    assert_eq!(container.id, ContainerId(21));
    assert_eq!(
        submission.values.get(&ElementId(200)),
        Some(&FieldValue::Single("first page".to_string()))
    );

    // Page 2 has a required field left blank; going back must not validate it.
    let outcome = harness
        .engine
        .advance(FormId(2), Some(submission.id), Intent::Prev, PageInput::default())
        .await
        .unwrap();
    let Outcome::Navigated { submission: back, container } = outcome else {
        panic!("expected Navigated");
    };
    assert_eq!(container.id, ContainerId(20));
    assert_eq!(back.values, submission.values);
    assert_eq!(back.errors, submission.errors);
    assert_eq!(back.current_container_id, Some(ContainerId(20)));
}

#[test_log::test(tokio::test)]
async fn too_many_selections_name_the_bounds() {
    let choice = with_choices(
        element(
            300,
            30,
            ElementType::MultipleChoice,
            ElementSettings {
                min_answers: Some(1),
                max_answers: Some(2),
                ..Default::default()
            },
        ),
        &["Tea", "Coffee", "Water"],
    );
    let harness = Harness::new(vec![form(3, vec![container(30, 3, 0, vec![choice])], FormSettings::default())]);

    let mut page = PageInput::default();
    page.fields.insert(
        ElementId(300),
        FieldValue::Multiple(vec!["Tea".into(), "Coffee".into(), "Water".into()]),
    );
    let outcome = harness.engine.advance(FormId(3), None, Intent::Submit, page).await.unwrap();

    let Outcome::Rejected { errors, submission } = outcome else {
        panic!("expected Rejected");
    };
    assert_eq!(
        errors.fields.get(&ElementId(300)),
        Some(&vec!["Too many choices. Please select between 1 and 2 answers.".to_string()])
    );
    assert!(submission.values.is_empty());
}

#[test_log::test(tokio::test)]
async fn filled_honeypot_rejects_valid_page() {
    let harness = Harness::new(vec![two_page_form(FormSettings {
        honeypot_enabled: true,
        ..Default::default()
    })]);

    let mut page = human_input(&[(200, "perfectly valid")]);
    page.honeypot = Some("i am a bot".to_string());
    let outcome = harness.engine.advance(FormId(2), None, Intent::Next, page).await.unwrap();

    let Outcome::Rejected { errors, submission } = outcome else {
        panic!("expected Rejected");
    };
    assert_eq!(errors.page, vec![GENERIC_VETO.to_string()]);
    assert!(errors.fields.is_empty());
    assert!(submission.values.is_empty());
    assert_eq!(submission.current_container_id, Some(ContainerId(20)));
}

#[test_log::test(tokio::test)]
async fn three_page_walk_with_correction_and_completion() {
    let harness_form = form(
        4,
        vec![
            container(40, 4, 0, vec![required_text(400, 40)]),
            container(
                41,
                4,
                1,
                vec![
                    element(410, 41, ElementType::Separator, ElementSettings::default()),
                    with_choices(
                        element(
                            411,
                            41,
                            ElementType::Dropdown,
                            ElementSettings {
                                required: true,
                                ..Default::default()
                            },
                        ),
                        &["Small", "Large"],
                    ),
                ],
            ),
            container(
                42,
                4,
                2,
                vec![element(
                    420,
                    42,
                    ElementType::Range,
                    ElementSettings {
                        range_from: Some(1.0),
                        range_to: Some(5.0),
                        step_size: Some(1.0),
                        ..Default::default()
                    },
                )],
            ),
        ],
        FormSettings::default(),
    );
    let mut harness = Harness::new(vec![harness_form]);
    let engine = &harness.engine;

    let outcome = engine
        .advance(FormId(4), None, Intent::Next, input(&[(400, "Ada")]))
        .await
        .unwrap();
    let id = outcome.submission().id;

    let outcome = engine
        .advance(FormId(4), Some(id), Intent::Next, input(&[(411, "Medium")]))
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Rejected { .. }));

    let page = engine.current_page(FormId(4), Some(id)).await.unwrap();
    assert_eq!(page.container.id, ContainerId(41));
    assert_eq!(page.page_number, 2);
    assert_eq!(page.page_count, 3);
    assert!(!page.is_last);
    assert_eq!(
        page.errors.fields.get(&ElementId(411)),
        Some(&vec!["Please select one of the given choices.".to_string()])
    );

    let outcome = engine
        .advance(FormId(4), Some(id), Intent::Next, input(&[(411, "Large")]))
        .await
        .unwrap();
    let Outcome::Navigated { submission, container } = outcome else {
        panic!("expected Navigated");
    };
    assert_eq!(container.id, ContainerId(42));
    // Accepted pages carry no stale errors.
    assert!(submission.errors_for(ContainerId(41)).is_empty());
    assert!(!submission.values.contains_key(&ElementId(410)));

    let outcome = engine
        .advance(FormId(4), Some(id), Intent::Next, input(&[(420, "4")]))
        .await
        .unwrap();
    let Outcome::Completed { submission } = outcome else {
        panic!("expected Completed");
    };
    assert_eq!(
        submission.values,
        BTreeMap::from([
            (ElementId(400), FieldValue::Single("Ada".to_string())),
            (ElementId(411), FieldValue::Single("Large".to_string())),
            (ElementId(420), FieldValue::Single("4".to_string())),
        ])
    );

    let page = harness.engine.current_page(FormId(4), Some(id)).await.unwrap();
    assert!(page.read_only);
    assert!(page.is_last);
    assert!(harness.next_completion().await.is_some());
}
