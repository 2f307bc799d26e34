//! Prompt text for every model call in the pipeline.

use crate::profile::StoryProfile;

/// Judge reply meaning no continuity errors were found.
pub const NO_INCONSISTENCIES: &str = "NO_INCONSISTENCIES";
/// Verifier reply meaning every listed issue is fixed.
pub const ALL_RESOLVED: &str = "ALL_RESOLVED";

pub const JUDGE_SYSTEM: &str = "You are a meticulous continuity editor for serialized fiction. \
You compare scenes and report only factual contradictions.";

pub fn idea(template: &str, genre: &str) -> String {
    let body = template.replace("{genre}", genre);
    format!("{body}\n\nReply with the premise only, as a single paragraph of plain text.")
}

pub fn title(premise: &str) -> String {
    format!(
        "Give this story a short, intriguing title of at most eight words.\n\nPremise:\n{premise}\n\n\
         Reply with the title only, without quotes."
    )
}

pub fn outline(premise: &str, scene_count: u32) -> String {
    format!(
        "Plan a story in exactly {scene_count} scenes based on this premise:\n{premise}\n\n\
         Return STRICT JSON with this shape ONLY:\n\
         {{\"scenes\": [{{\"scene_number\": 1, \"scene_beat\": \"...\"}}, ...]}}\n\
         - scene_number counts from 1 to {scene_count}.\n\
         - Each scene_beat is two to four sentences describing what happens.\n\
         - The last scene resolves the central conflict."
    )
}

pub fn characters(premise: &str, outline: &[String]) -> String {
    let beats = numbered(outline);
    format!(
        "List the main characters of this story.\n\nPremise:\n{premise}\n\nOutline:\n{beats}\n\n\
         Write one character per line in exactly this format:\n\
         [[Name]] one or two sentences of description (age, look, role, motivation)\n\
         Do not write anything else."
    )
}

pub struct ScenePrompt<'a> {
    pub profile: &'a StoryProfile,
    pub premise: &'a str,
    pub beat: &'a str,
    pub roster: &'a str,
    pub position: u32,
    pub total: u32,
    pub previous: &'a str,
    pub min_chars: usize,
}

pub fn scene(p: &ScenePrompt<'_>) -> String {
    let mut out = format!(
        "You are writing scene {} of {} of a {} story.\n\nPremise:\n{}\n\nCharacters:\n{}\n\n",
        p.position, p.total, p.profile.genre, p.premise, p.roster
    );
    if !p.previous.is_empty() {
        out.push_str("Previous scenes (for continuity, do not repeat them):\n");
        out.push_str(p.previous);
        out.push_str("\n\n");
    }
    out.push_str(&format!("Write this scene:\n{}\n\n", p.beat));
    if !p.profile.scene_guidance.is_empty() {
        out.push_str(&p.profile.scene_guidance);
        out.push_str("\n\n");
    }
    out.push_str(&format!(
        "Write at least {} characters of prose. Plain text only: no headings, no markdown, no scene numbers.",
        p.min_chars
    ));
    if p.position == p.total {
        out.push_str(
            "\nThis is the final scene. Bring the story to an explicit conclusion and resolve the central conflict; \
             do not leave the ending open.",
        );
    }
    out
}

pub fn summarize(scene_text: &str) -> String {
    format!(
        "Write a detailed description of the following scene for a continuity editor. \
         Record every character present, what they know, their physical state, objects, locations, \
         time of day and any facts established.\n\nScene:\n{scene_text}"
    )
}

pub fn judge(new_summary: &str, prior_summaries: &[String]) -> String {
    let prior = prior_summaries
        .iter()
        .enumerate()
        .map(|(i, s)| format!("Earlier scene {}:\n{}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Earlier scenes, oldest first:\n{prior}\n\nNew scene:\n{new_summary}\n\n\
         Does the new scene contradict anything established in the earlier scenes \
         (names, ages, injuries, objects, locations, timeline, who knows what)?\n\
         If there are no contradictions reply with exactly {NO_INCONSISTENCIES}.\n\
         Otherwise reply with a numbered list of the contradictions, most serious first."
    )
}

pub fn rewrite(scene_text: &str, beat: &str, issues: &str) -> String {
    format!(
        "Rewrite the scene below so it fixes every continuity issue listed. \
         Keep the events of the scene beat, the voice and the length.\n\n\
         Scene beat:\n{beat}\n\nIssues:\n{issues}\n\nScene:\n{scene_text}\n\n\
         Return the full rewritten scene as plain text only."
    )
}

pub fn verify(scene_text: &str, issues: &str) -> String {
    format!(
        "These continuity issues were reported for a scene:\n{issues}\n\nRewritten scene:\n{scene_text}\n\n\
         If every issue is fixed reply with exactly {ALL_RESOLVED}.\n\
         Otherwise reply with a numbered list of the issues that remain."
    )
}

pub fn style(style_prompt: &str, narration: &str) -> String {
    format!("{style_prompt}\n\nText:\n{narration}")
}

fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, b)| format!("{}. {}", i + 1, b))
        .collect::<Vec<_>>()
        .join("\n")
}
