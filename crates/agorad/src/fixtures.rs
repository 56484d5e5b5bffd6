//! Deterministic offline fixtures.
//!
//! Scripted model and search responses covering the built-in evaluation
//! scenarios, so the harness can run without network access or credentials.
//! Model replies are keyed by the exact message (classification), by the
//! topic named in the question (planning, synthesis, critique, calibration)
//! or by position label (section drafts).

use crate::config::Config;
use crate::gateway::{FakeModelGateway, FakeRetrievalGateway, Stage};
use crate::pipeline::ResponsePipeline;
use agora_shared::{GatewayError, SourceDocument};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

/// Backoff used offline; scripted failures should not slow the run down
const OFFLINE_BACKOFF_MS: u64 = 5;

const CLEAN_CRITIQUE: &str = r#"{"loaded_language":{"found":false,"detail":""},"missing_hedge":{"found":false,"detail":""},"one_sided_omission":{"found":false,"detail":""}}"#;

fn published(date: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn source(url: &str, title: &str, snippet: &str, relevance: f32, date: &str) -> SourceDocument {
    let mut doc = SourceDocument::new(url, snippet)
        .with_title(title)
        .with_relevance(relevance);
    doc.published = published(date);
    doc
}

fn classify(message: &str, verdict: &str, rationale: &str, certainty: f32, topic: &str, hint: &str) -> (String, String) {
    (
        format!("Message: {}", message),
        json!({
            "verdict": verdict,
            "rationale": rationale,
            "certainty": certainty,
            "topic": topic,
            "redirect_hint": hint,
        })
        .to_string(),
    )
}

fn classifications() -> Vec<(String, String)> {
    vec![
        classify(
            "What's the weather like today?",
            "out_of_scope",
            "A weather forecast is not a political question.",
            0.96,
            "weather",
            "how climate policy is being debated in Congress",
        ),
        classify(
            "Can you help me with my homework?",
            "out_of_scope",
            "General homework help falls outside political events and policy.",
            0.93,
            "homework",
            "a civics or government topic you are studying",
        ),
        classify(
            "What about the thing with the rates?",
            "ambiguous",
            "The message does not say which rates it means, so it could be monetary policy or something unrelated.",
            0.35,
            "rates",
            "the debate over Federal Reserve interest rate decisions",
        ),
        classify(
            "You know, that one everyone talks about.",
            "ambiguous",
            "The message points back to an unclear earlier subject without naming it.",
            0.2,
            "unclear reference",
            "",
        ),
        classify(
            "The rates thing.",
            "ambiguous",
            "The message repeats an unspecified reference to rates.",
            0.3,
            "rates",
            "the debate over Federal Reserve interest rate decisions",
        ),
        classify(
            "What happened with the 2023 debt ceiling negotiations?",
            "in_scope",
            "The 2023 debt ceiling negotiations were a major fiscal policy event.",
            0.97,
            "2023 debt ceiling negotiations",
            "",
        ),
        classify(
            "What are the main arguments in the current immigration policy debate?",
            "in_scope",
            "Immigration policy is an active public policy debate.",
            0.95,
            "immigration policy debate",
            "",
        ),
        classify(
            "What were the key moments of the 2024 presidential primaries?",
            "in_scope",
            "The 2024 presidential primaries are an electoral event.",
            0.96,
            "2024 presidential primaries",
            "",
        ),
        classify(
            "How did people react to the Supreme Court's affirmative action decision?",
            "in_scope",
            "Reactions to a Supreme Court ruling on admissions policy are a political topic.",
            0.94,
            "affirmative action ruling",
            "",
        ),
    ]
}

/// One in-scope scenario: what the model says at each stage
struct Topic {
    needle: &'static str,
    queries: [&'static str; 2],
    sources: Vec<SourceDocument>,
    structure: Value,
    sections: Vec<(&'static str, &'static str)>,
    critique: Vec<Result<String, GatewayError>>,
    revision: Option<Value>,
    calibration: Result<Value, GatewayError>,
}

fn debt_ceiling() -> Topic {
    Topic {
        needle: "debt ceiling",
        queries: [
            "2023 debt ceiling deal terms",
            "debt ceiling negotiations 2023 arguments",
        ],
        sources: vec![
            source(
                "https://apnews.com/article/debt-ceiling-deal-2023",
                "Debt ceiling deal becomes law",
                "The Fiscal Responsibility Act suspended the borrowing limit until January 2025 and capped discretionary spending for two years.",
                0.95,
                "2023-06-03",
            ),
            source(
                "https://www.cbo.gov/publication/59225",
                "CBO estimate for the Fiscal Responsibility Act",
                "CBO projects deficits falling by roughly $1.5 trillion over a decade, mostly through appropriation caps.",
                0.55,
                "2023-05-30",
            ),
            source(
                "https://www.reuters.com/markets/us/treasury-cash-warning",
                "Treasury warns of June cash shortfall",
                "Yellen told lawmakers the government could exhaust extraordinary measures by early June; economists said missed payments would rattle markets.",
                0.3,
                "2023-05-22",
            ),
            source(
                "https://www.brookings.edu/articles/debt-limit-leverage",
                "Should the debt limit be leverage?",
                "Some scholars argue Congress should never hold the borrowing cap hostage because even brief default threatens economic stability.",
                0.15,
                "2023-05-10",
            ),
        ],
        structure: json!({
            "overview": "In spring 2023 House Republicans and the White House negotiated over raising the federal debt limit. The resulting Fiscal Responsibility Act suspended the limit and capped some spending, while the negotiations themselves were criticized for risking a default.",
            "contested": true,
            "perspectives": [
                {"label": "Raise the limit without conditions", "stance": "The debt limit covers obligations Congress already approved and should not be used as leverage.", "source_ids": [3, 4]},
                {"label": "Pair the increase with spending limits", "stance": "Raising the limit should come with enforceable spending restraint.", "source_ids": [1, 2]}
            ],
            "claims": [
                {"text": "The Fiscal Responsibility Act suspended the debt limit until January 2025", "perspective": "Pair the increase with spending limits", "source_ids": [1]},
                {"text": "CBO estimated the act would reduce deficits by about $1.5 trillion over ten years", "perspective": "Pair the increase with spending limits", "source_ids": [2]},
                {"text": "Treasury warned it could run out of cash in early June 2023", "perspective": "Raise the limit without conditions", "source_ids": [3]},
                {"text": "A default would have disrupted financial markets", "perspective": "Raise the limit without conditions", "source_ids": [3, 4]}
            ]
        }),
        sections: vec![
            (
                "Pair the increase with spending limits",
                "Supporters of pairing the increase with spending limits argue that the debt limit is one of the few moments when Congress must confront the long-term fiscal path. They point to the caps in the Fiscal Responsibility Act and to CBO's estimate of lower deficits as evidence that the leverage produced durable savings.",
            ),
            (
                "Raise the limit without conditions",
                "Those who favor raising the limit without conditions argue that it covers spending Congress already approved, so tying it to new demands risks a default nobody intends. They cite Treasury's warning that cash could run out in early June and economists' view that even a brief default would unsettle markets and raise borrowing costs.",
            ),
        ],
        critique: vec![Ok(CLEAN_CRITIQUE.to_string())],
        revision: None,
        calibration: Ok(json!({
            "claims": [
                {"id": "c1", "label": "verified", "rationale": "Reported by a major wire service and matches the enacted text."},
                {"id": "c2", "label": "likely", "rationale": "Official CBO projection; projections can change with later appropriations."},
                {"id": "c3", "label": "likely", "rationale": "Reported by a single wire service citing the Treasury Secretary."},
                {"id": "c4", "label": "verified", "rationale": "Independent economic commentary and wire reporting agree."}
            ],
            "unresolved_questions": [
                "whether the spending caps will hold through future appropriations"
            ]
        })),
    }
}

fn immigration() -> Topic {
    Topic {
        needle: "immigration",
        queries: [
            "immigration policy debate border enforcement",
            "immigration legal pathways arguments",
        ],
        sources: vec![
            source(
                "https://www.cbp.gov/newsroom/stats/southwest-land-border-encounters",
                "Southwest land border encounters",
                "Border Patrol recorded more than two million southwest border encounters during fiscal year 2023.",
                0.95,
                "2023-10-20",
            ),
            source(
                "https://www.nytimes.com/2023/12/immigration-court-backlog",
                "Immigration courts face a record backlog",
                "Pending asylum cases in immigration courts passed two million, with some hearings scheduled years out.",
                0.55,
                "2023-12-05",
            ),
            source(
                "https://www.migrationpolicy.org/article/labor-shortages-visas",
                "Labor shortages and temporary visas",
                "Employers in agriculture and construction report persistent worker shortages that expanded visa programs could address.",
                0.3,
                "2023-09-14",
            ),
            source(
                "https://www.pewresearch.org/politics/2024/immigration-views",
                "Americans' views on immigration",
                "A majority of surveyed adults favor allowing long-term undocumented residents a way to stay legally.",
                0.15,
                "2024-02-15",
            ),
        ],
        structure: json!({
            "overview": "The immigration debate centers on how to manage high numbers of arrivals at the southern border and whether to expand legal routes into the country.",
            "contested": true,
            "perspectives": [
                {"label": "Prioritize border enforcement", "stance": "Control of the border should come before new legal pathways.", "source_ids": [1, 2]},
                {"label": "Expand legal pathways", "stance": "More orderly legal routes would ease pressure at the border and meet labor needs.", "source_ids": [3, 4]}
            ],
            "claims": [
                {"text": "Border Patrol recorded more than two million southwest border encounters in fiscal 2023", "perspective": "Prioritize border enforcement", "source_ids": [1]},
                {"text": "Pending asylum cases in immigration courts exceeded two million", "perspective": "Prioritize border enforcement", "source_ids": [2]},
                {"text": "Employers in agriculture and construction report persistent labor shortages", "perspective": "Expand legal pathways", "source_ids": [3]},
                {"text": "Most surveyed adults support legal status for long-term undocumented residents", "perspective": "Expand legal pathways", "source_ids": [4]}
            ]
        }),
        sections: vec![
            (
                "Expand legal pathways",
                "Advocates of expanding legal pathways argue that orderly visa and work programs would ease pressure at the border while meeting labor needs. They point to shortages reported by employers in agriculture and construction, and to polling that shows broad support for legal status for long-term residents who have lived in the country for years.",
            ),
            (
                "Prioritize border enforcement",
                "Supporters of prioritizing border enforcement argue that the flood of migrants has overwhelmed the system and that control must come before any new legal pathways. They cite record encounter numbers reported by Border Patrol and court backlogs that leave asylum cases pending for years, saying stricter rules and more personnel would restore order.",
            ),
        ],
        critique: vec![
            Ok(json!({
                "loaded_language": {"found": true, "detail": "\"flood of migrants\" in the border enforcement section"},
                "missing_hedge": {"found": false, "detail": ""},
                "one_sided_omission": {"found": false, "detail": ""}
            })
            .to_string()),
            Ok(CLEAN_CRITIQUE.to_string()),
        ],
        revision: Some(json!({
            "sections": [
                {"label": "Prioritize border enforcement", "narrative": "Supporters of prioritizing border enforcement argue that the current volume of arrivals has strained the system and that control should come before any new legal pathways. They cite encounter numbers reported by Border Patrol and court backlogs that leave asylum cases pending for years, saying stricter rules and more personnel would restore order."}
            ],
            "qualifiers": [
                {"claim_id": "c2", "qualifier": "according to a single national survey"}
            ]
        })),
        calibration: Ok(json!({
            "claims": [
                {"id": "c1", "label": "likely", "rationale": "Reported by a labor-focused policy institute."},
                {"id": "c2", "label": "likely", "rationale": "One national survey; wording of such questions varies."},
                {"id": "c3", "label": "likely", "rationale": "Official agency statistics, single source."},
                {"id": "c4", "label": "likely", "rationale": "Single newspaper report citing court data."}
            ],
            "unresolved_questions": []
        })),
    }
}

fn primaries() -> Topic {
    Topic {
        needle: "primaries",
        queries: [
            "2024 presidential primaries key moments",
            "2024 primaries results turnout",
        ],
        sources: vec![
            source(
                "https://www.npr.org/2024/01/iowa-caucus-results",
                "Iowa caucus results reshape the field",
                "Several Republican candidates suspended their campaigns within days of the Iowa caucuses.",
                0.95,
                "2024-01-22",
            ),
            source(
                "https://ballotpedia.org/Presidential_primaries_2024",
                "2024 presidential primaries",
                "Nikki Haley won the District of Columbia contest before ending her campaign after Super Tuesday.",
                0.55,
                "2024-03-07",
            ),
            source(
                "https://www.fec.gov/data/elections/president/2024",
                "2024 presidential campaign finance",
                "Filings show an incumbent facing only token opposition for renomination.",
                0.3,
                "2024-04-15",
            ),
        ],
        structure: json!({
            "overview": "The 2024 primaries began with the Iowa caucuses in January and were effectively decided by Super Tuesday in March.",
            "contested": true,
            "perspectives": [
                {"label": "The nominations were settled before voting began", "stance": "Polling and incumbency made both outcomes predictable from the start.", "source_ids": [3]},
                {"label": "Early contests reshaped the field", "stance": "Iowa and New Hampshire narrowed the race quickly.", "source_ids": [1, 2]}
            ],
            "claims": [
                {"text": "Several Republican candidates withdrew shortly after the Iowa caucuses", "perspective": "Early contests reshaped the field", "source_ids": [1]},
                {"text": "Nikki Haley won the District of Columbia primary", "perspective": "Early contests reshaped the field", "source_ids": [2]},
                {"text": "The incumbent faced only token opposition for renomination", "perspective": "The nominations were settled before voting began", "source_ids": [3]},
                {"text": "Turnout in several primaries was lower than in 2020", "perspective": "The nominations were settled before voting began", "source_ids": []}
            ]
        }),
        sections: vec![
            (
                "Early contests reshaped the field",
                "This view holds that the early contests did real work: candidates who trailed in Iowa and New Hampshire left the race within weeks, and later primaries became a two-person contest. Supporters of this reading note that the calendar narrowed the field faster than in most recent cycles.",
            ),
            (
                "The nominations were settled before voting began",
                "This view holds that both nominations were effectively settled before the first ballots were cast. An incumbent president faced only token opposition, and the Republican frontrunner led national polls by wide margins throughout, so the contests mostly confirmed an outcome that polling had long suggested.",
            ),
        ],
        critique: vec![Ok(CLEAN_CRITIQUE.to_string())],
        revision: None,
        calibration: Ok(json!({
            "claims": [
                {"id": "c1", "label": "likely", "rationale": "Public radio reporting on campaign suspensions."},
                {"id": "c2", "label": "likely", "rationale": "Election reference site listing certified results."},
                {"id": "c3", "label": "verified", "rationale": "Campaign finance filings."},
                {"id": "c4", "label": "likely", "rationale": "Commonly reported, but no retrieved source states it."}
            ],
            "unresolved_questions": [
                "how much primary turnout changed compared with 2020"
            ]
        })),
    }
}

fn affirmative_action() -> Topic {
    Topic {
        needle: "affirmative action",
        queries: [
            "Supreme Court affirmative action ruling reactions",
            "affirmative action decision Harvard UNC response",
        ],
        sources: vec![
            source(
                "https://www.supremecourt.gov/opinions/22pdf/20-1199_hgdj.pdf",
                "Students for Fair Admissions v. Harvard",
                "The Court held 6-3 that the Harvard and UNC admissions programs violate the Equal Protection Clause.",
                0.95,
                "2023-06-29",
            ),
            source(
                "https://www.scotusblog.com/2023/06/justices-strike-down-race-conscious-admissions",
                "Justices strike down race-conscious admissions",
                "The majority opinion said applicants must be treated as individuals, not on the basis of race.",
                0.55,
                "2023-06-29",
            ),
            source(
                "https://www.npr.org/2023/07/colleges-respond-admissions-ruling",
                "Colleges respond to the admissions ruling",
                "Several universities said they would pursue new outreach and essay prompts to keep classes diverse; advocates warned Black and Hispanic enrollment could fall.",
                0.3,
                "2023-07-02",
            ),
            source(
                "https://www.pewresearch.org/short-reads/2023/06/admissions-race",
                "Public views on race in admissions",
                "Half of surveyed adults disapproved of selective colleges considering race, while a third approved.",
                0.15,
                "2023-06-08",
            ),
        ],
        structure: json!({
            "overview": "In June 2023 the Supreme Court ended race-conscious admissions at Harvard and the University of North Carolina. Reactions split over whether the ruling restores equal treatment or sets back campus diversity.",
            "contested": true,
            "perspectives": [
                {"label": "Race-conscious admissions serve diversity", "stance": "Considering race as one factor helped colleges build diverse classes.", "source_ids": [3]},
                {"label": "Admissions should be race-neutral", "stance": "Applicants should be judged as individuals without regard to race.", "source_ids": [1, 2, 4]}
            ],
            "claims": [
                {"text": "The Court ruled 6-3 that the Harvard and UNC admissions programs violated the Equal Protection Clause", "perspective": "Admissions should be race-neutral", "source_ids": [1, 2]},
                {"text": "More surveyed adults disapproved than approved of colleges considering race", "perspective": "Admissions should be race-neutral", "source_ids": [4]},
                {"text": "Several universities announced new outreach and essay policies to maintain diversity", "perspective": "Race-conscious admissions serve diversity", "source_ids": [3]},
                {"text": "Enrollment of Black and Hispanic students could decline at selective colleges", "perspective": "Race-conscious admissions serve diversity", "source_ids": [3]}
            ]
        }),
        sections: vec![
            (
                "Admissions should be race-neutral",
                "Supporters of the ruling argue that admissions decisions should not weigh an applicant's race at all, and that the Equal Protection Clause requires treating applicants as individuals. They note that the Court agreed in a 6-3 decision and point to surveys in which more adults opposed than supported considering race.",
            ),
            (
                "Race-conscious admissions serve diversity",
                "Critics of the ruling argue that considering race as one factor among many helped selective colleges build classes that reflect the country. They point to universities announcing new outreach and essay policies, and warn that enrollment of Black and Hispanic students could fall at the most selective schools.",
            ),
        ],
        critique: vec![Err(GatewayError::ServiceError("HTTP 503: upstream overloaded".into()))],
        revision: None,
        calibration: Err(GatewayError::Timeout),
    }
}

fn topics() -> Vec<Topic> {
    vec![debt_ceiling(), immigration(), primaries(), affirmative_action()]
}

fn source_scores() -> String {
    json!({
        "domains": [
            {"domain": "apnews.com", "reputation": 0.9},
            {"domain": "cbo.gov", "reputation": 0.95},
            {"domain": "reuters.com", "reputation": 0.9},
            {"domain": "brookings.edu", "reputation": 0.8},
            {"domain": "cbp.gov", "reputation": 0.9},
            {"domain": "nytimes.com", "reputation": 0.85},
            {"domain": "migrationpolicy.org", "reputation": 0.8},
            {"domain": "pewresearch.org", "reputation": 0.85},
            {"domain": "npr.org", "reputation": 0.85},
            {"domain": "ballotpedia.org", "reputation": 0.8},
            {"domain": "fec.gov", "reputation": 0.95},
            {"domain": "supremecourt.gov", "reputation": 0.95},
            {"domain": "scotusblog.com", "reputation": 0.85}
        ]
    })
    .to_string()
}

/// Scripted gateways for every built-in scenario
pub fn offline_gateways() -> (FakeModelGateway, FakeRetrievalGateway) {
    let mut model = FakeModelGateway::new();
    for (needle, reply) in classifications() {
        model = model.on_matching(Stage::Classify, needle, reply);
    }
    model = model
        .on(
            Stage::Classify,
            json!({
                "verdict": "ambiguous",
                "rationale": "I could not tell which political event or policy this message is about.",
                "certainty": 0.3,
                "topic": "",
                "redirect_hint": ""
            })
            .to_string(),
        )
        .on(Stage::SourceScoring, source_scores());

    let mut retrieval = FakeRetrievalGateway::new();
    for topic in topics() {
        let plan = json!({"queries": topic.queries, "rapidly_evolving": false}).to_string();
        model = model
            .on_matching(Stage::QueryPlanning, topic.needle, plan)
            .on_matching(Stage::Synthesis, topic.needle, topic.structure.to_string())
            .sequence_matching(Stage::Critique, topic.needle, topic.critique);
        for (label, text) in topic.sections {
            model = model.on_matching(Stage::SectionDraft, format!("Position: {}", label), text);
        }
        if let Some(revision) = topic.revision {
            model = model.on_matching(Stage::Revision, topic.needle, revision.to_string());
        }
        model = match topic.calibration {
            Ok(reply) => model.on_matching(Stage::Calibration, topic.needle, reply.to_string()),
            Err(e) => model.sequence_matching(Stage::Calibration, topic.needle, vec![Err(e)]),
        };
        retrieval = retrieval.on_query(topic.needle, topic.sources);
    }

    // Anything else in scope finds nothing and says so
    model = model
        .on(Stage::QueryPlanning, r#"{"queries":[],"rapidly_evolving":false}"#)
        .on(
            Stage::Synthesis,
            r#"{"overview":"","contested":true,"perspectives":[],"claims":[]}"#,
        )
        .on(Stage::Critique, CLEAN_CRITIQUE);

    (model, retrieval)
}

/// Pipeline over the offline gateways
pub fn offline_pipeline(config: &Config) -> ResponsePipeline {
    let mut config = config.clone();
    config.timeouts.retry_backoff_ms = OFFLINE_BACKOFF_MS;
    let (model, retrieval) = offline_gateways();
    ResponsePipeline::new(Arc::new(config), Arc::new(model), Arc::new(retrieval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{CompletionOptions, ModelGateway, Prompt, RetrievalGateway, SearchOptions};

    #[test]
    fn test_published_dates_parse() {
        assert!(published("2023-06-03").is_some());
        assert!(published("June 2023").is_none());
    }

    #[tokio::test]
    async fn test_unknown_message_is_ambiguous() {
        let (model, _) = offline_gateways();
        let reply = model
            .complete(
                &Prompt::new(Stage::Classify, "", "Message: tell me a joke"),
                &CompletionOptions::default(),
            )
            .await
            .unwrap();
        assert!(reply.contains("\"ambiguous\""));
    }

    #[tokio::test]
    async fn test_topic_searches_match() {
        let (_, retrieval) = offline_gateways();
        let docs = retrieval
            .search("Debt ceiling negotiations 2023 arguments", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(docs.len(), 4);
        let none = retrieval
            .search("farm bill", &SearchOptions::default())
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
