use approx::assert_relative_eq;
use assert_matches::assert_matches;
use rstest::*;

use crate::alignment::Alignment;
use crate::driver::{select_best, ModelFitDriver};
use crate::errors::{DataError, FitError};
use crate::extract::{extract, BranchSiteClass, RecordValues, SiteClass, StatisticsRecord};
use crate::fitter::FitResult;
use crate::marking::{compute_mark_set, MarkSet};
use crate::models::{BranchLengthInit::*, ModelFamily, StartingCondition};
use crate::test_helpers::{StubFitter, BG_OMEGA, FG_OMEGA};
use crate::tree::Tree;
use crate::{record_wo_desc as record, tree};

fn inputs() -> (Tree, Alignment, MarkSet) {
    let tree = tree!("((sp1:0.1,sp2:0.12):0.05,sp3:0.2,sp4:0.25);");
    let alignment = Alignment::new(vec![
        record!("sp1", b"ATGAAATTT"),
        record!("sp2", b"ATGAAGTTT"),
        record!("sp3", b"ATGCCCTTC"),
        record!("sp4", b"ATGCCTTTC"),
    ])
    .unwrap();
    let marks = compute_mark_set(&tree, &["sp1".to_string(), "sp2".to_string()]).unwrap();
    (tree, alignment, marks)
}

fn best_record(family: ModelFamily) -> StatisticsRecord {
    let (tree, alignment, marks) = inputs();
    let fitter = StubFitter::new(|request| Some(-1000.0 - 10.0 * request.condition.omega));
    let driver = ModelFitDriver::new(&tree, &alignment, &marks, &fitter);
    let results = driver.run_family(family);
    let best = select_best(family, &results).unwrap();
    extract(best, "primates", "ND1", &marks).unwrap()
}

#[test]
fn branch_partition_scenario() {
    let (tree, alignment, marks) = inputs();
    let fitter = StubFitter::new(|request| match request.condition.blen_init {
        Fixed => Some(-2000.0),
        Random if request.condition.omega == 0.2 => Some(-1500.5),
        Random => Some(-1600.0),
    });
    let driver = ModelFitDriver::new(&tree, &alignment, &marks, &fitter);
    let results = driver.run_family(ModelFamily::BFree);
    assert_eq!(results.len(), 6);
    let best = select_best(ModelFamily::BFree, &results).unwrap();
    assert_eq!(best.model_name, "b_free.random_0.2w");

    let record = extract(best, "primates", "ND1", &marks).unwrap();
    assert_eq!(
        record.values,
        RecordValues::BranchPartition {
            background: BG_OMEGA,
            foreground: FG_OMEGA
        }
    );
    let line = record.to_string();
    assert_eq!(line, "primates,ND1,b_free,-1500.5,0.4,2.5");
    assert_eq!(line.matches(',').count(), 5);
}

#[test]
fn single_rate_record() {
    let record = best_record(ModelFamily::M0);
    assert_eq!(record.model, "M0");
    assert_relative_eq!(record.lnl, -1002.0);
    // the root has no branch, the first branch in postorder is sp1
    assert_eq!(record.values, RecordValues::SingleRate { omega: FG_OMEGA });
    assert_eq!(record.to_string().split(',').count(), 5);
}

#[rstest]
#[case::m3(ModelFamily::M3, 10)]
#[case::m2a_rel(ModelFamily::M2aRel, 10)]
#[case::bsd(ModelFamily::BsD, 13)]
#[case::bsc(ModelFamily::BsC, 13)]
#[case::bsa1(ModelFamily::BsA1, 16)]
#[case::bsa(ModelFamily::BsA, 16)]
fn class_records_field_count(#[case] family: ModelFamily, #[case] fields: usize) {
    let record = best_record(family);
    assert_eq!(record.model, family.name());
    assert_eq!(record.to_string().split(',').count(), fields);
}

#[test]
fn site_class_values() {
    let record = best_record(ModelFamily::M3);
    let RecordValues::SiteClasses(classes) = record.values else {
        panic!("M3 should produce site classes");
    };
    assert_eq!(classes.len(), 3);
    assert_relative_eq!(classes[0].proportion, 0.1);
    assert_relative_eq!(classes[2].omega, 2.5);
}

#[test]
fn branch_site_class_values() {
    let record = best_record(ModelFamily::BsA);
    let RecordValues::BranchSiteClasses(classes) = record.values else {
        panic!("bsA should produce branch-site classes");
    };
    assert_eq!(classes.len(), 4);
    assert_relative_eq!(classes[3].proportion, 0.4);
    assert_relative_eq!(classes[3].background, 3.5);
    assert_relative_eq!(classes[3].foreground, 4.5);
}

#[rstest]
#[case::b_free(ModelFamily::BFree)]
#[case::m0(ModelFamily::M0)]
#[case::m2a_rel(ModelFamily::M2aRel)]
#[case::bsa(ModelFamily::BsA)]
fn record_round_trip(#[case] family: ModelFamily) {
    let record = best_record(family);
    let parsed: StatisticsRecord = record.to_string().parse().unwrap();
    assert_eq!(parsed.clade, record.clade);
    assert_eq!(parsed.gene, record.gene);
    assert_eq!(parsed.model, record.model);
    assert_eq!(parsed.lnl, record.lnl);
    assert_eq!(parsed, record);
}

#[test]
fn parse_record_with_newline() {
    let record: StatisticsRecord = "c,g,bsD,-10.5,0.5,0.1,0.2,0.3,0.3,0.4,0.2,1.0,2.0\n"
        .parse()
        .unwrap();
    assert_eq!(record.model, "bsD");
    assert_eq!(
        record.values,
        RecordValues::BranchSiteClasses(vec![
            BranchSiteClass {
                proportion: 0.5,
                background: 0.1,
                foreground: 0.2
            },
            BranchSiteClass {
                proportion: 0.3,
                background: 0.3,
                foreground: 0.4
            },
            BranchSiteClass {
                proportion: 0.2,
                background: 1.0,
                foreground: 2.0
            },
        ])
    );
    let record: StatisticsRecord = "c,g,M3,-1,0.5,0.1,0.3,1,0.2,4".parse().unwrap();
    assert_eq!(
        record.values,
        RecordValues::SiteClasses(vec![
            SiteClass {
                proportion: 0.5,
                omega: 0.1
            },
            SiteClass {
                proportion: 0.3,
                omega: 1.0
            },
            SiteClass {
                proportion: 0.2,
                omega: 4.0
            },
        ])
    );
}

#[rstest]
#[case::too_short("c,g,M0,-1")]
#[case::not_a_number("c,g,M0,-1,abc")]
#[case::odd_value_count("c,g,M0,-1,1,2,3")]
fn malformed_records(#[case] line: &str) {
    let err = line.parse::<StatisticsRecord>().unwrap_err();
    assert_matches!(err.downcast_ref::<DataError>(), Some(_));
}

fn bare_result(family: ModelFamily) -> FitResult {
    let mut result = FitResult::failed(family, StartingCondition::new(Fixed, 0.7));
    result.lnl = -10.0;
    result
}

#[rstest]
#[case::m0_without_branches(ModelFamily::M0, "w")]
#[case::b_free_without_foreground(ModelFamily::BFree, "foreground w")]
#[case::m3_without_tables(ModelFamily::M3, "proportions")]
#[case::bsc_without_tables(ModelFamily::BsC, "proportions")]
fn missing_parameters(#[case] family: ModelFamily, #[case] expected_key: &str) {
    let (_, _, marks) = inputs();
    let err = extract(&bare_result(family), "c", "g", &marks).unwrap_err();
    assert_matches!(
        err.downcast_ref::<FitError>(),
        Some(FitError::SchemaMismatch { key, .. }) if key == expected_key
    );
}

#[test]
fn too_few_site_classes() {
    let (_, _, marks) = inputs();
    let mut result = bare_result(ModelFamily::BsA);
    result.classes.insert("proportions".to_string(), vec![0.25; 4]);
    result
        .classes
        .insert("background w".to_string(), vec![0.1, 1.0, 0.1, 1.0]);
    result
        .classes
        .insert("foreground w".to_string(), vec![0.1, 1.0, 3.0]);
    let err = extract(&result, "c", "g", &marks).unwrap_err();
    assert_matches!(
        err.downcast_ref::<FitError>(),
        Some(FitError::SchemaMismatch { family, key }) if family == "bsA" && key == "foreground w"
    );
}
