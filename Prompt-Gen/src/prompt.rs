use crate::types::{GenerateRequest, MediaKind};

const IMAGE_TEMPLATE: &str = "You write prompts for an AI image generator.\n\
Write {count} distinct image prompts based on the context below. \
Each prompt describes one still image: subject, setting, composition, lighting and style.\n\
{detail}\n\
Respond with JSON only, in the form {\"prompts\": [\"...\", \"...\"]}.\n\n\
## Context\n{context}";

const VIDEO_TEMPLATE: &str = "You write prompts for an AI video generator.\n\
Write {count} distinct video prompts based on the context below. \
Each prompt describes one short clip: subject, action, camera movement, setting and mood.\n\
{detail}\n\
Respond with JSON only, in the form {\"prompts\": [\"...\", \"...\"]}.\n\n\
## Context\n{context}";

const BRIEF_DETAIL: &str = "Keep each prompt to one or two sentences.";

const ENHANCED_DETAIL: &str = "Make each prompt rich and specific (three to five sentences): \
name the visual style, lens or shot type, color palette and atmosphere.";

/// Replace `{key}` placeholders. Unknown placeholders are left as-is.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (key, value) in vars {
        rendered = rendered.replace(&format!("{{{}}}", key), value);
    }
    rendered
}

/// Build the LLM prompt for a generation request.
pub fn build_prompt(request: &GenerateRequest) -> String {
    let template = match request.media_kind {
        MediaKind::Image => IMAGE_TEMPLATE,
        MediaKind::Video => VIDEO_TEMPLATE,
    };
    let detail = if request.enhanced {
        ENHANCED_DETAIL
    } else {
        BRIEF_DETAIL
    };
    let count = request.count.to_string();
    render(
        template,
        &[
            ("count", &count),
            ("detail", detail),
            ("context", request.context.trim()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let out = render("{a} and {b}", &[("a", "x")]);
        assert_eq!(out, "x and {b}");
    }

    #[test]
    fn test_build_prompt_video_enhanced() {
        let req = GenerateRequest::new("  rainy neon city ", 4)
            .with_media_kind(MediaKind::Video)
            .with_enhanced(true);
        let prompt = build_prompt(&req);
        assert!(prompt.contains("Write 4 distinct video prompts"));
        assert!(prompt.contains("camera movement"));
        assert!(prompt.contains("three to five sentences"));
        assert!(prompt.ends_with("## Context\nrainy neon city"));
        assert!(prompt.contains(r#"{"prompts": ["...", "..."]}"#));
    }

    #[test]
    fn test_build_prompt_image_brief() {
        let prompt = build_prompt(&GenerateRequest::new("cats", 2));
        assert!(prompt.contains("image prompts"));
        assert!(prompt.contains("one or two sentences"));
    }
}
