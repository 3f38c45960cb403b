//! Demo skills for the nine music stages
//!
//! Deterministic stand-ins for the real generators: every choice comes from
//! the node's `SeededRandom`, and every value is a pure function of the
//! inputs and the seed. Useful for the CLI, tests and CI pipelines.
//!
//! The validator passes once the lyrics have been revised `pass_after`
//! times; each `fix` invocation bumps the revision by one.

use anyhow::Context;
use serde_json::{json, Value};

use crate::retrieval::{pinned_retrieve, Source};
use crate::runtime::{InputSelector, NodeInputs, Pick};

use super::{skill_fn, ExecutionContext, SkillRegistry};

const GENRES: &[&str] = &["synthwave", "indie folk", "drum and bass", "lo-fi", "gospel"];
const KEYS: &[&str] = &["C major", "A minor", "E minor", "G major", "D dorian"];
const MOODS: &[&str] = &["nostalgic", "defiant", "tender", "restless", "euphoric", "wry"];
const INSTRUMENTS: &[&str] = &["808", "rhodes", "nylon guitar", "strings", "analog bass", "choir"];

/// Registry with all nine stages bound to their demo skills
pub fn demo_registry(pass_after: u32) -> SkillRegistry {
    let mut registry = SkillRegistry::new();
    registry
        .register("plan", skill_fn(plan))
        .register("style", skill_fn(style))
        .register("lyrics", skill_fn(lyrics))
        .register("producer", skill_fn(producer))
        .register_with_selector("compose", skill_fn(compose), composition_inputs())
        .register_with_selector(
            "validate",
            skill_fn(move |inputs, ctx| validate(inputs, ctx, pass_after)),
            InputSelector::validation(),
        )
        .register_with_selector("fix", skill_fn(fix), InputSelector::repair())
        .register("render", skill_fn(render))
        .register("review", skill_fn(review));
    registry
}

/// Registry whose validator never passes
pub fn failing_registry() -> SkillRegistry {
    demo_registry(u32::MAX)
}

/// Compose reads the repaired variants when they exist
fn composition_inputs() -> InputSelector {
    InputSelector::Aggregate(vec![
        Pick::new("style", &["style", "@fix.style"]),
        Pick::new("lyrics", &["lyrics", "@fix.lyrics"]),
        Pick::new("producer_notes", &["producer", "@fix.producer_notes"]),
    ])
}

fn revision(inputs: &NodeInputs) -> u64 {
    inputs
        .get("lyrics")
        .and_then(|l| l.get("revision"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

async fn plan(inputs: NodeInputs, ctx: ExecutionContext) -> anyhow::Result<Value> {
    let mut rng = ctx.rng();
    let title = inputs
        .get("input")
        .and_then(|i| i.get("title"))
        .and_then(Value::as_str)
        .unwrap_or("untitled")
        .to_string();
    let bpm = rng.uniform_int(72, 140)?;
    let key = rng.choice(KEYS).copied().context("no keys")?;
    let sections = ["intro", "verse", "chorus", "verse", "chorus", "bridge", "chorus"];

    Ok(json!({
        "blueprint": {
            "title": title,
            "bpm": bpm,
            "key": key,
            "sections": sections,
        },
        "sds": {"version": 1, "subject": &*ctx.subject_id},
        "planned_at": ctx.now().to_rfc3339(),
    }))
}

async fn style(inputs: NodeInputs, ctx: ExecutionContext) -> anyhow::Result<Value> {
    let mut rng = ctx.rng();
    let bpm = inputs
        .get("plan")
        .and_then(|p| p.pointer("/blueprint/bpm"))
        .and_then(Value::as_i64)
        .context("plan has no bpm")?;
    let genre = rng.choice(GENRES).copied().context("no genres")?;
    let moods = rng.sample(MOODS, 2)?;
    Ok(json!({"genre": genre, "moods": moods, "bpm": bpm}))
}

async fn lyrics(inputs: NodeInputs, ctx: ExecutionContext) -> anyhow::Result<Value> {
    let mut rng = ctx.rng();
    let pins: Vec<String> = inputs
        .get("input")
        .and_then(|i| i.get("pins"))
        .and_then(Value::as_array)
        .map(|pins| {
            pins.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let title = inputs
        .get("plan")
        .and_then(|p| p.pointer("/blueprint/title"))
        .and_then(Value::as_str)
        .unwrap_or("untitled");

    let retrieved = pinned_retrieve(title, &reference_corpus(), &pins, 2);
    ctx.emit_drift(&retrieved);

    let mood = rng.choice(MOODS).copied().context("no moods")?;
    let lines: Vec<String> = retrieved
        .chunks
        .iter()
        .map(|c| format!("{} ({})", c.text, mood))
        .collect();

    Ok(json!({
        "text": lines.join("\n"),
        "revision": 0,
        "citations": retrieved.hashes(),
        "temperature": ctx.decoder.map(|d| d.temperature),
    }))
}

async fn producer(_inputs: NodeInputs, ctx: ExecutionContext) -> anyhow::Result<Value> {
    let mut rng = ctx.rng();
    let mut arrangement: Vec<&str> = INSTRUMENTS.to_vec();
    rng.shuffle(&mut arrangement);
    arrangement.truncate(3);
    let lead = rng
        .weighted_choice(&["vocal", "synth", "guitar"], &[0.6, 0.3, 0.1])?
        .to_string();
    Ok(json!({"arrangement": arrangement, "lead": lead, "mix": {"lufs": -14}}))
}

async fn compose(inputs: NodeInputs, ctx: ExecutionContext) -> anyhow::Result<Value> {
    let genre = inputs
        .get("style")
        .and_then(|s| s.get("genre"))
        .and_then(Value::as_str)
        .context("compose needs a style")?;
    let revision = revision(&inputs);
    Ok(json!({
        "prompt": format!("{} track, take {}, revision {}", genre, ctx.seed, revision),
        "revision": revision,
        "seed": ctx.seed,
    }))
}

async fn validate(
    inputs: NodeInputs,
    ctx: ExecutionContext,
    pass_after: u32,
) -> anyhow::Result<Value> {
    let mut rng = ctx.rng();
    let revision = revision(&inputs);
    let hook = round3(rng.uniform_range(0.4, 0.9)?);
    let coherence = round3(rng.uniform_range(0.5, 0.95)?);
    let pass = revision >= u64::from(pass_after);
    Ok(json!({
        "pass": pass,
        "scores": {
            "hook": hook,
            "coherence": coherence,
            "overall": round3((hook + coherence) / 2.0),
        },
        "revision": revision,
    }))
}

async fn fix(inputs: NodeInputs, ctx: ExecutionContext) -> anyhow::Result<Value> {
    let mut rng = ctx.rng();
    let mut lyrics = inputs
        .get("lyrics")
        .cloned()
        .context("nothing to repair: no lyrics")?;
    let revision = revision(&inputs) + 1;
    let mood = rng.choice(MOODS).copied().context("no moods")?;
    if let Some(obj) = lyrics.as_object_mut() {
        obj.insert("revision".to_string(), json!(revision));
        obj.insert("repair_mood".to_string(), json!(mood));
    }
    Ok(json!({"lyrics": lyrics}))
}

async fn render(inputs: NodeInputs, ctx: ExecutionContext) -> anyhow::Result<Value> {
    let mut rng = ctx.rng();
    let prompt = inputs
        .get("compose")
        .and_then(|c| c.get("prompt"))
        .and_then(Value::as_str)
        .context("render needs a composition")?;
    Ok(json!({
        "audio_uri": format!("render://{}/{}.wav", ctx.run_id, ctx.seed),
        "duration_s": rng.uniform_int(150, 240)?,
        "prompt": prompt,
    }))
}

async fn review(inputs: NodeInputs, _ctx: ExecutionContext) -> anyhow::Result<Value> {
    let passed = inputs
        .get("validate")
        .and_then(|v| v.get("pass"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok(json!({
        "verdict": if passed { "ship" } else { "needs work" },
        "reviewed": inputs.keys().cloned().collect::<Vec<_>>(),
    }))
}

fn reference_corpus() -> Vec<Source> {
    vec![
        Source::new("imagery", 1.0)
            .with_chunk("headlights on the overpass")
            .with_chunk("salt on the window glass"),
        Source::new("hooks", 0.8)
            .with_chunk("we were louder than the static")
            .with_chunk("hold the note until it breaks"),
    ]
}
