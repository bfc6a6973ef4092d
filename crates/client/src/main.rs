//! CLI for threshold-protected exams.
//!
//! State lives in a JSON snapshot file. Each command loads it, runs one
//! handler and writes it back. Commands:
//! - Setting up organizations and exams
//! - Handing key shares back for reconstruction
//! - Adding and decrypting protected questions
//! - Generating student keys, signing and submitting answers
//! - Computing results and inspecting progress
//! - Dispatching a serialized call from a file

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use tracing::{debug, info};

use exam_client::{
    generate_keypair, private_key_from_pem, private_key_to_pem, AnswerBuilder, DEFAULT_KEY_BITS,
};
use exam_crypto::public_key_pem;
use exam_module::handlers::{
    handle_calculate_results, handle_clear_organization_share, handle_create_exam,
    handle_create_question, handle_decrypt_all_questions, handle_decrypt_question,
    handle_delete_exam, handle_delete_question, handle_register_organization, handle_retract_share,
    handle_submit_answers, handle_submit_share,
};
use exam_module::queries::{
    get_exam_stats, get_exam_summaries, get_stalled_exams, handle_query, ExamQuery,
    ExamQueryResponse, ShareProgress,
};
use exam_module::{dispatch, CallContext, ExamCall, MemoryStore, ModuleState, ProtocolConfig, StoreSnapshot};
use exam_module::store::ExamStore;
use exam_types::{AnswerChoice, QuestionId, QuestionOptions, ShareBytes, SignedAnswer};

#[derive(Parser)]
#[command(name = "exam-cli")]
#[command(about = "CLI for threshold-protected exams")]
struct Cli {
    /// State snapshot file
    #[arg(long, default_value = "exam-state.json")]
    state: PathBuf,

    /// Protocol configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Name recorded in logs as the caller
    #[arg(long, default_value = "cli")]
    caller: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty state file
    Init {
        /// Overwrite an existing state file
        #[arg(long)]
        force: bool,
    },

    /// Register a custodian organization
    RegisterOrg {
        #[arg(long)]
        id: String,

        #[arg(long)]
        name: String,
    },

    /// Create an exam and issue key shares to its organizations
    CreateExam {
        #[arg(long)]
        id: String,

        #[arg(long)]
        title: String,

        /// File holding the exam content
        #[arg(long)]
        content_file: PathBuf,

        /// Assigned organizations (comma-separated)
        #[arg(long, value_delimiter = ',', required = true)]
        orgs: Vec<String>,

        /// Shares required to decrypt
        #[arg(long)]
        threshold: u32,
    },

    /// Hand an organization's share back
    SubmitShare {
        #[arg(long)]
        exam: String,

        #[arg(long)]
        org: String,

        /// Share as hex (defaults to the share issued to the organization)
        #[arg(long)]
        share: Option<String>,
    },

    /// Withdraw a submitted share so it can be corrected
    RetractShare {
        #[arg(long)]
        exam: String,

        #[arg(long)]
        org: String,
    },

    /// Add a question protected by a passphrase
    AddQuestion {
        #[arg(long)]
        id: String,

        #[arg(long)]
        exam: String,

        #[arg(long)]
        org: String,

        #[arg(long)]
        content: String,

        #[arg(long)]
        option_a: String,

        #[arg(long)]
        option_b: String,

        #[arg(long)]
        option_c: String,

        #[arg(long)]
        option_d: String,

        /// Correct option: a, b, c or d
        #[arg(long)]
        answer: AnswerChoice,

        #[arg(long)]
        passphrase: String,
    },

    /// Decrypt one question in place
    DecryptQuestion {
        #[arg(long)]
        id: String,

        #[arg(long)]
        passphrase: String,
    },

    /// Decrypt every protected question an organization added to an exam
    DecryptQuestions {
        #[arg(long)]
        exam: String,

        #[arg(long)]
        org: String,

        #[arg(long)]
        passphrase: String,
    },

    /// Generate a student signing key
    Keygen {
        /// Private key output (PEM); the public key goes to <out>.pub
        #[arg(long)]
        out: PathBuf,

        #[arg(long, default_value_t = DEFAULT_KEY_BITS)]
        bits: usize,
    },

    /// Sign a batch of answers
    SignAnswers {
        /// Private key (PEM)
        #[arg(long)]
        key: PathBuf,

        #[arg(long)]
        exam: String,

        #[arg(long)]
        student: String,

        /// Answers as question=choice (repeatable)
        #[arg(long = "answer", value_parser = parse_answer, required = true)]
        answers: Vec<(QuestionId, AnswerChoice)>,

        /// Batch output file (JSON)
        #[arg(long)]
        out: PathBuf,
    },

    /// Verify and store a signed answer batch
    SubmitAnswers {
        /// Batch file produced by sign-answers
        #[arg(long)]
        batch: PathBuf,
    },

    /// Compute and store results for an exam
    Results {
        #[arg(long)]
        exam: String,
    },

    /// Show share collection progress
    Progress {
        #[arg(long)]
        exam: String,
    },

    /// Clear the share an organization holds for one exam
    ClearShare {
        #[arg(long)]
        org: String,

        #[arg(long)]
        exam: String,
    },

    /// Delete an exam
    DeleteExam {
        #[arg(long)]
        exam: String,
    },

    /// Delete a question and its answers
    DeleteQuestion {
        #[arg(long)]
        id: String,
    },

    /// List the shares an organization holds
    OrgShares {
        #[arg(long)]
        org: String,
    },

    /// Show exam counts and listing
    Stats,

    /// Dispatch a JSON-encoded call
    Call {
        /// File holding one call, e.g. {"call": "delete_exam", "exam_id": "final"}
        file: PathBuf,
    },
}

fn parse_answer(s: &str) -> Result<(QuestionId, AnswerChoice), String> {
    let (question, choice) = s
        .split_once('=')
        .ok_or_else(|| format!("expected question=choice, got {:?}", s))?;
    let choice = choice.parse::<AnswerChoice>().map_err(|e| e.to_string())?;
    Ok((QuestionId::from(question.trim()), choice))
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn load_config(path: Option<&Path>) -> Result<ProtocolConfig> {
    match path {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Ok(ProtocolConfig::from_json(&json)?)
        }
        None => Ok(ProtocolConfig::default()),
    }
}

fn load_state(path: &Path) -> Result<MemoryStore> {
    let json = fs::read_to_string(path).with_context(|| {
        format!("reading state {} (run `exam-cli init` first)", path.display())
    })?;
    let snapshot: StoreSnapshot =
        serde_json::from_str(&json).with_context(|| format!("parsing state {}", path.display()))?;
    Ok(MemoryStore::from_snapshot(snapshot))
}

fn save_state(path: &Path, store: &MemoryStore) -> Result<()> {
    let json = serde_json::to_string_pretty(&store.snapshot())?;
    fs::write(path, json).with_context(|| format!("writing state {}", path.display()))?;
    debug!(path = %path.display(), "State saved");
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn keygen_cmd(out: &Path, bits: usize) -> Result<()> {
    let key = generate_keypair(bits, &mut OsRng)?;
    let private_pem = private_key_to_pem(&key)?;
    let public_pem = public_key_pem(&key.to_public_key())?;

    let mut public_path = out.as_os_str().to_owned();
    public_path.push(".pub");
    let public_path = PathBuf::from(public_path);

    fs::write(out, private_pem.as_bytes())
        .with_context(|| format!("writing {}", out.display()))?;
    fs::write(&public_path, public_pem)
        .with_context(|| format!("writing {}", public_path.display()))?;

    info!(bits, "Generated signing key");
    println!("Private key: {}", out.display());
    println!("Public key:  {}", public_path.display());
    Ok(())
}

fn sign_answers_cmd(
    key: &Path,
    exam: String,
    student: String,
    answers: Vec<(QuestionId, AnswerChoice)>,
    out: &Path,
) -> Result<()> {
    let pem = fs::read_to_string(key).with_context(|| format!("reading {}", key.display()))?;
    let key = private_key_from_pem(&pem)?;

    let builder = answers
        .into_iter()
        .fold(AnswerBuilder::new(exam.into(), student.into()), |b, (q, c)| {
            b.answer(q, c)
        });
    let batch = builder.sign(&key)?;

    fs::write(out, serde_json::to_string_pretty(&batch)?)
        .with_context(|| format!("writing {}", out.display()))?;
    println!("Signed {} answers -> {}", batch.len(), out.display());
    Ok(())
}

/// Run a command against loaded state.
fn run(state: &ModuleState, ctx: &CallContext, command: Commands) -> Result<()> {
    match command {
        Commands::Init { .. } | Commands::Keygen { .. } | Commands::SignAnswers { .. } => {
            bail!("command does not operate on state")
        }

        Commands::RegisterOrg { id, name } => {
            let org = handle_register_organization(state, ctx, id.into(), name)?;
            println!("Registered organization {} ({})", org.id, org.name);
        }

        Commands::CreateExam {
            id,
            title,
            content_file,
            orgs,
            threshold,
        } => {
            let content = fs::read_to_string(&content_file)
                .with_context(|| format!("reading {}", content_file.display()))?;
            let organization_ids = orgs.into_iter().map(Into::into).collect();
            let exam =
                handle_create_exam(state, ctx, id.into(), title, content, organization_ids, threshold)?;
            println!(
                "Created exam {}: {}-of-{} organizations",
                exam.id,
                exam.threshold,
                exam.assigned_organizations.len()
            );
        }

        Commands::SubmitShare { exam, org, share } => {
            let share = match share {
                Some(hex) => ShareBytes::from_hex(&hex).context("share is not valid hex")?,
                None => state
                    .store
                    .get_organization(&org.clone().into())
                    .and_then(|o| o.share_for(&exam.clone().into()).cloned())
                    .ok_or_else(|| anyhow!("organization {} holds no share for exam {}", org, exam))?,
            };
            let outcome = handle_submit_share(state, ctx, exam.into(), org.into(), share)?;
            if outcome.decrypted {
                println!("Exam decrypted.");
                if let Some(content) = outcome.decrypted_content {
                    println!("{}", content);
                }
            } else {
                println!(
                    "Share accepted: {}/{} collected, {} remaining",
                    outcome.shares_collected, outcome.threshold, outcome.remaining
                );
            }
        }

        Commands::RetractShare { exam, org } => {
            handle_retract_share(state, ctx, exam.clone().into(), org.clone().into())?;
            println!("Retracted share of {} for exam {}", org, exam);
        }

        Commands::AddQuestion {
            id,
            exam,
            org,
            content,
            option_a,
            option_b,
            option_c,
            option_d,
            answer,
            passphrase,
        } => {
            let options = QuestionOptions {
                a: option_a,
                b: option_b,
                c: option_c,
                d: option_d,
            };
            let question = handle_create_question(
                state,
                ctx,
                id.into(),
                exam.into(),
                org.into(),
                content,
                options,
                answer,
                &passphrase,
            )?;
            println!("Added protected question {}", question.id);
        }

        Commands::DecryptQuestion { id, passphrase } => {
            let plain = handle_decrypt_question(state, ctx, id.into(), &passphrase)?;
            print_json(&plain)?;
        }

        Commands::DecryptQuestions {
            exam,
            org,
            passphrase,
        } => {
            let report =
                handle_decrypt_all_questions(state, ctx, exam.into(), org.into(), &passphrase)?;
            print_json(&report)?;
            if !report.failed.is_empty() {
                bail!("{} question(s) could not be decrypted", report.failed.len());
            }
        }

        Commands::SubmitAnswers { batch } => {
            let json = fs::read_to_string(&batch)
                .with_context(|| format!("reading {}", batch.display()))?;
            let batch: Vec<SignedAnswer> =
                serde_json::from_str(&json).context("parsing answer batch")?;
            let receipt = handle_submit_answers(state, ctx, batch)?;
            println!("Stored {} answers", receipt.accepted);
        }

        Commands::Results { exam } => {
            let results = handle_calculate_results(state, ctx, exam.into())?;
            if results.is_empty() {
                println!("No answers yet");
            }
            for r in results {
                println!(
                    "  {}: {}/{} ({:.1}%)",
                    r.student_id, r.correct, r.total, r.percentage
                );
            }
        }

        Commands::Progress { exam } => {
            let exam = state
                .store
                .get_exam(&exam.clone().into())
                .ok_or_else(|| anyhow!("exam {} not found", exam))?;
            print_json(&ShareProgress::from_exam(&exam))?;
        }

        Commands::ClearShare { org, exam } => {
            let cleared =
                handle_clear_organization_share(state, ctx, org.clone().into(), exam.clone().into())?;
            if cleared {
                println!("Cleared share of {} for exam {}", org, exam);
            } else {
                println!("{} held no share for exam {}", org, exam);
            }
        }

        Commands::DeleteExam { exam } => {
            let deleted = handle_delete_exam(state, ctx, exam.into())?;
            println!("Deleted exam {}", deleted.id);
        }

        Commands::DeleteQuestion { id } => {
            let deleted = handle_delete_question(state, ctx, id.into())?;
            println!("Deleted question {} of exam {}", deleted.id, deleted.exam_id);
        }

        Commands::OrgShares { org } => {
            match handle_query(
                state,
                ExamQuery::OrganizationShares {
                    organization_id: org.clone().into(),
                },
            ) {
                ExamQueryResponse::Shares(Some(shares)) => {
                    for (exam_id, share) in shares {
                        println!("  {}: {}", exam_id, share.to_hex());
                    }
                }
                _ => bail!("organization {} not found", org),
            }
        }

        Commands::Stats => {
            let stats = get_exam_stats(state);
            println!(
                "Exams: {} total, {} decrypted, {} encrypted",
                stats.total, stats.decrypted, stats.encrypted
            );
            for summary in get_exam_summaries(state, 0, usize::MAX) {
                println!(
                    "  [{}] {} - {}/{} shares{}",
                    summary.exam_id,
                    summary.title,
                    summary.shares_collected,
                    summary.threshold,
                    if summary.is_decrypted { ", decrypted" } else { "" }
                );
            }
            for exam_id in get_stalled_exams(state) {
                println!("  [{}] threshold met but reconstruction failed", exam_id);
            }
        }

        Commands::Call { file } => {
            let json = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let call: ExamCall = serde_json::from_str(&json).context("parsing call")?;
            debug!(call = call.name(), "Dispatching from file");
            print_json(&dispatch(state, ctx, call)?)?;
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("exam_cli=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            if cli.state.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", cli.state.display());
            }
            save_state(&cli.state, &MemoryStore::new())?;
            info!(path = %cli.state.display(), "Initialized state");
            println!("Initialized {}", cli.state.display());
            Ok(())
        }

        Commands::Keygen { out, bits } => keygen_cmd(&out, bits),

        Commands::SignAnswers {
            key,
            exam,
            student,
            answers,
            out,
        } => sign_answers_cmd(&key, exam, student, answers, &out),

        command => {
            let config = load_config(cli.config.as_deref())?;
            let store = load_state(&cli.state)?;
            let state = ModuleState::with_store(store, config);
            let ctx = CallContext {
                caller: cli.caller,
                timestamp: now(),
            };

            // Failed reconstructions still change the exam, so save either way
            let result = run(&state, &ctx, command);
            save_state(&cli.state, &state.store)?;
            result
        }
    }
}
