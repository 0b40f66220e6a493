use std::collections::BTreeMap;

use approx::assert_relative_eq;

use crate::alignment::Alignment;
use crate::fitter::{BranchStats, FitResult};
use crate::marking::compute_mark_set;
use crate::models::{BranchLengthInit::*, ModelFamily, ModelType, StartingCondition};
use crate::tree::NodeIdx::{Internal as I, Leaf as L};
use crate::{record_wo_desc as record, tree};

#[test]
fn failed_result_has_no_likelihood() {
    let condition = StartingCondition::new(Random, 0.7);
    let result = FitResult::failed(ModelFamily::BsA, condition);
    assert!(result.is_failed());
    assert_eq!(result.lnl, f64::NEG_INFINITY);
    assert_eq!(result.model_name, "bsA.random_0.7w");
    assert_eq!(result.model_type, ModelType::BranchSite);
    assert!(result.branches.is_empty());
    assert!(result.classes.is_empty());
}

#[test]
fn branch_lookup() {
    let mut result = FitResult::failed(ModelFamily::BFree, StartingCondition::new(Fixed, 0.2));
    result.lnl = -10.0;
    result.branches = vec![
        BranchStats {
            node: L(2),
            omega: 0.3,
            foreground: true,
        },
        BranchStats {
            node: I(1),
            omega: 0.1,
            foreground: false,
        },
    ];
    assert!(!result.is_failed());
    assert_relative_eq!(result.branch(&I(1)).unwrap().omega, 0.1);
    assert!(result.branch(&L(5)).is_none());
    result.classes = BTreeMap::from([("w".to_string(), vec![0.1, 1.0, 2.0])]);
    assert_eq!(result.classes["w"].len(), 3);
}

#[cfg(unix)]
mod command {
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use approx::assert_relative_eq;
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::fitter::{CommandFitter, FitRequest, Fitter};
    use crate::marking::MarkSet;
    use crate::tree::Tree;

    struct Fixture {
        tree: Tree,
        alignment: Alignment,
        marks: MarkSet,
    }

    fn fixture() -> Fixture {
        let tree = tree!("((sp1:0.1,sp2:0.12):0.05,sp3:0.2,sp4:0.25);");
        let alignment = Alignment::new(vec![
            record!("sp1", b"ATGAAA"),
            record!("sp2", b"ATGAAG"),
            record!("sp3", b"ATGCCC"),
            record!("sp4", b"ATG---"),
        ])
        .unwrap();
        let marks = compute_mark_set(&tree, &["sp1".to_string(), "sp2".to_string()]).unwrap();
        Fixture {
            tree,
            alignment,
            marks,
        }
    }

    fn request(fixture: &Fixture, family: ModelFamily) -> FitRequest<'_> {
        FitRequest {
            tree: &fixture.tree,
            alignment: &fixture.alignment,
            marks: &fixture.marks,
            family,
            condition: StartingCondition::new(Fixed, 0.7),
        }
    }

    // run through `sh`, never exec'd directly (ETXTBSY)
    fn script(dir: &TempDir, body: &str) -> String {
        let path = dir.path().join("fitter.sh");
        fs::write(&path, format!("{body}\n")).unwrap();
        path.to_string_lossy().to_string()
    }

    fn script_fitter(dir: &TempDir, body: &str) -> CommandFitter {
        CommandFitter::new("sh").args(vec![script(dir, body)])
    }

    static BRANCH_RESULT: &str = r#"cat > result.json <<'EOF'
{"lnl": -1021.25, "model_type": "branch", "branches": [
  {"node": 1, "w": 0.9, "mark": 1},
  {"node": 5, "w": 0.2, "mark": 0},
  {"node": 2, "w": 0.9, "mark": 1},
  {"node": 4, "w": 0.2, "mark": 0},
  {"node": 3, "w": 0.9, "mark": 1}
]}
EOF"#;

    static CLASSES: &str = r#"cat > classes.json <<'EOF'
{"proportions": [0.5, 0.3, 0.2], "w": [0.05, 1.0, 3.5]}
EOF"#;

    fn entries(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn successful_fit_in_isolated_workdir() {
        let fixture = fixture();
        let scripts = tempdir().unwrap();
        let work = tempdir().unwrap();
        let fitter = script_fitter(&scripts, BRANCH_RESULT).work_root(work.path());

        let mut result = fitter.fit(&request(&fixture, ModelFamily::BFree)).unwrap();
        assert_relative_eq!(result.lnl, -1021.25);
        assert_eq!(result.model_name, "b_free.bl_0.7w");
        assert_eq!(result.model_type, ModelType::Branch);
        let nodes = result.branches.iter().map(|b| b.node).collect::<Vec<_>>();
        assert_eq!(nodes, vec![L(2), L(3), I(1), L(4), L(5)]);
        assert!(result.branch(&I(1)).unwrap().foreground);
        assert!(!result.branch(&L(4)).unwrap().foreground);
        assert!(result.classes.is_empty());

        let workdir = result.workdir.clone().unwrap();
        assert!(workdir.starts_with(work.path()));
        let newick = fs::read_to_string(workdir.join("tree.newick")).unwrap();
        assert_eq!(
            newick.trim(),
            "((sp1:0.1 #1,sp2:0.12 #1):0.05 #1,sp3:0.2,sp4:0.25);"
        );
        let request: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(workdir.join("request.json")).unwrap())
                .unwrap();
        assert_eq!(request["family"], "b_free");
        assert_eq!(request["fix_blength"], 1);
        assert_eq!(request["settings"]["model"], 2);
        assert_eq!(request["settings"]["NSsites"], 0);
        assert_eq!(request["nodes"][1]["mark"], 1);
        assert_eq!(request["nodes"][4]["mark"], 0);
        assert!(workdir.join("alignment.fasta").exists());

        fitter.release(&mut result);
        assert!(!workdir.exists());
        assert!(result.workdir.is_none());
    }

    #[test]
    fn site_model_reads_class_tables() {
        let fixture = fixture();
        let scripts = tempdir().unwrap();
        let work = tempdir().unwrap();
        let body = format!(
            "{CLASSES}\necho '{{\"lnl\": -900.5, \"model_type\": \"site\", \"branches\": []}}' > result.json"
        );
        let fitter = script_fitter(&scripts, &body).work_root(work.path());
        let result = fitter.fit(&request(&fixture, ModelFamily::M3)).unwrap();
        assert_eq!(result.classes["proportions"], vec![0.5, 0.3, 0.2]);
        assert_eq!(result.classes["w"], vec![0.05, 1.0, 3.5]);
    }

    #[test]
    fn site_model_without_class_tables_fails() {
        let fixture = fixture();
        let scripts = tempdir().unwrap();
        let work = tempdir().unwrap();
        let body = "echo '{\"lnl\": -900.5, \"model_type\": \"site\"}' > result.json";
        let fitter = script_fitter(&scripts, body).work_root(work.path());
        let err = fitter.fit(&request(&fixture, ModelFamily::M3)).unwrap_err();
        assert!(err.to_string().contains("No classes.json"));
        assert_eq!(entries(work.path()), 0);
    }

    #[test]
    fn user_model_classes_only_after_reload() {
        let fixture = fixture();
        let scripts = tempdir().unwrap();
        let work = tempdir().unwrap();
        let body = format!(
            "{CLASSES}\necho '{{\"lnl\": -905.0, \"model_type\": \"user\"}}' > result.json"
        );
        let fitter = script_fitter(&scripts, &body).work_root(work.path());
        let mut result = fitter.fit(&request(&fixture, ModelFamily::M2aRel)).unwrap();
        assert_eq!(result.model_type, ModelType::User);
        assert!(result.classes.is_empty());

        result.model_type = ModelType::BranchSite;
        fitter.reload(&mut result).unwrap();
        assert_eq!(result.classes["w"], vec![0.05, 1.0, 3.5]);
        fitter.release(&mut result);
        assert_eq!(entries(work.path()), 0);
    }

    #[test]
    fn missing_model_type_defaults_to_family() {
        let fixture = fixture();
        let scripts = tempdir().unwrap();
        let work = tempdir().unwrap();
        let body = "echo '{\"lnl\": -1000.0}' > result.json";
        let fitter = script_fitter(&scripts, body).work_root(work.path());
        let result = fitter.fit(&request(&fixture, ModelFamily::M0)).unwrap();
        assert_eq!(result.model_type, ModelType::Null);
        assert!(result.branches.is_empty());
    }

    #[test]
    fn null_likelihood_is_minus_infinity() {
        let fixture = fixture();
        let scripts = tempdir().unwrap();
        let work = tempdir().unwrap();
        let body = "echo '{\"lnl\": null, \"model_type\": \"null\"}' > result.json";
        let fitter = script_fitter(&scripts, body).work_root(work.path());
        let result = fitter.fit(&request(&fixture, ModelFamily::M0)).unwrap();
        assert!(result.is_failed());
    }

    #[test]
    fn failing_program() {
        let fixture = fixture();
        let scripts = tempdir().unwrap();
        let work = tempdir().unwrap();
        let fitter = script_fitter(&scripts, "echo boom >&2\nexit 3").work_root(work.path());
        let err = fitter.fit(&request(&fixture, ModelFamily::M0)).unwrap_err();
        assert!(err.to_string().contains("exited with"));
        assert_eq!(entries(work.path()), 0);
    }

    #[test]
    fn failing_program_keeps_workdir_on_request() {
        let fixture = fixture();
        let scripts = tempdir().unwrap();
        let work = tempdir().unwrap();
        let fitter = script_fitter(&scripts, "exit 1")
            .work_root(work.path())
            .keep_workdirs(true);
        assert!(fitter.fit(&request(&fixture, ModelFamily::M0)).is_err());
        assert_eq!(entries(work.path()), 1);
    }

    #[test]
    fn missing_and_malformed_results() {
        let fixture = fixture();
        let scripts = tempdir().unwrap();
        let work = tempdir().unwrap();
        let fitter = script_fitter(&scripts, "true").work_root(work.path());
        let err = fitter.fit(&request(&fixture, ModelFamily::M0)).unwrap_err();
        assert!(err.to_string().contains("No result.json"));

        let scripts = tempdir().unwrap();
        let fitter = script_fitter(&scripts, "echo 'lnl = -3' > result.json")
            .work_root(work.path());
        let err = fitter.fit(&request(&fixture, ModelFamily::M0)).unwrap_err();
        assert!(err.to_string().contains("Malformed result.json"));
    }

    #[test]
    fn unknown_node_in_result() {
        let fixture = fixture();
        let scripts = tempdir().unwrap();
        let work = tempdir().unwrap();
        let body = "echo '{\"lnl\": -3.0, \"branches\": [{\"node\": 42, \"w\": 1.0, \"mark\": 0}]}' > result.json";
        let fitter = script_fitter(&scripts, body).work_root(work.path());
        let err = fitter.fit(&request(&fixture, ModelFamily::M0)).unwrap_err();
        assert!(err.to_string().contains("unknown node 42"));
    }

    #[test]
    fn slow_program_times_out() {
        let fixture = fixture();
        let scripts = tempdir().unwrap();
        let work = tempdir().unwrap();
        let fitter = script_fitter(&scripts, "sleep 10")
            .work_root(work.path())
            .timeout(Some(Duration::from_millis(200)));
        let err = fitter.fit(&request(&fixture, ModelFamily::M0)).unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn fitter_arguments_precede_request() {
        let fixture = fixture();
        let scripts = tempdir().unwrap();
        let work = tempdir().unwrap();
        let body = "echo \"$@\" > args.txt\n\
                    test \"$1\" = \"--fast\" && test \"$2\" = \"-n\" && test \"$3\" = \"request.json\" \
                    && test -f \"$3\" || exit 7\n\
                    echo '{\"lnl\": -1.5}' > result.json";
        let fitter = script_fitter(&scripts, body)
            .args(vec!["--fast".to_string()])
            .args(vec!["-n".to_string()])
            .work_root(work.path())
            .keep_workdirs(true);
        let result = fitter.fit(&request(&fixture, ModelFamily::M0)).unwrap();
        assert_relative_eq!(result.lnl, -1.5);
        let workdir = result.workdir.unwrap();
        let args = fs::read_to_string(workdir.join("args.txt")).unwrap();
        assert_eq!(args.trim(), "--fast -n request.json");
    }

    #[test]
    fn failing_argument_check_is_reported() {
        let fixture = fixture();
        let scripts = tempdir().unwrap();
        let work = tempdir().unwrap();
        let body = "test \"$1\" = \"request.json\" || exit 7\necho '{\"lnl\": -1.5}' > result.json";
        let fitter = script_fitter(&scripts, body)
            .args(vec!["--fast".to_string()])
            .work_root(work.path());
        let err = fitter.fit(&request(&fixture, ModelFamily::M0)).unwrap_err();
        assert!(err.to_string().contains("exit status: 7"));
    }

    #[test]
    fn missing_program() {
        let fixture = fixture();
        let work = tempdir().unwrap();
        let fitter = CommandFitter::new("./no-such-fitter-program").work_root(work.path());
        let err = fitter.fit(&request(&fixture, ModelFamily::M0)).unwrap_err();
        assert!(err.to_string().contains("Could not start fitter"));
    }
}
