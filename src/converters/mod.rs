// Converters module - format translation between APIs
//
// The proxy speaks Anthropic on the client side and OpenAI on the Copilot
// side. Translation is Value-driven: neither vendor schema is modeled as
// closed types, so unknown shapes coerce to defaults or drop silently
// instead of failing the request.
// - core: coercion helpers and the stop-reason table
// - anthropic_to_openai: Anthropic request → OpenAI request
// - openai_to_anthropic: OpenAI completion → Anthropic message

pub mod core;
pub mod anthropic_to_openai;
pub mod openai_to_anthropic;
