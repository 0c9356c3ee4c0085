//! The validation floor from the HTTP surface's component design: checks
//! that don't belong to any single downstream component (Gate doesn't know
//! about message shape, Router doesn't know about flag combinations) so they
//! live here, run before `Gate::admit` is even attempted.

use gateway_protocol::openai::chat::ChatCompletionRequest;
use gateway_protocol::openai::responses::CreateResponseRequest;

use crate::error::ApiError;

pub fn validate_chat_request(request: &ChatCompletionRequest) -> Result<(), ApiError> {
    if request.messages.is_empty() {
        return Err(ApiError::bad_request("messages must not be empty"));
    }
    if request.stream == Some(true) && request.n.is_some_and(|n| n > 1) {
        return Err(ApiError::bad_request("stream=true is incompatible with n>1"));
    }
    Ok(())
}

pub fn validate_response_request(request: &CreateResponseRequest) -> Result<(), ApiError> {
    if request.input.trim().is_empty() {
        return Err(ApiError::bad_request("input must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use gateway_protocol::openai::chat::{ChatMessage, MessageContent, MessageRole};

    use super::*;

    fn base_request() -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "openrouter/gpt-4o".to_string(),
            messages: vec![ChatMessage {
                role: MessageRole::User,
                content: MessageContent::Text("hi".to_string()),
                name: None,
                tool_call_id: None,
            }],
            temperature: None,
            top_p: None,
            top_k: None,
            max_tokens: None,
            presence_penalty: None,
            frequency_penalty: None,
            stream: None,
            n: None,
            tools: None,
            tool_choice: None,
            gateway: None,
        }
    }

    #[test]
    fn rejects_empty_messages() {
        let mut request = base_request();
        request.messages.clear();
        assert!(validate_chat_request(&request).is_err());
    }

    #[test]
    fn rejects_streaming_with_multiple_choices() {
        let mut request = base_request();
        request.stream = Some(true);
        request.n = Some(2);
        assert!(validate_chat_request(&request).is_err());
    }

    #[test]
    fn accepts_streaming_with_a_single_choice() {
        let mut request = base_request();
        request.stream = Some(true);
        request.n = Some(1);
        assert!(validate_chat_request(&request).is_ok());
    }

    #[test]
    fn accepts_a_well_formed_request() {
        assert!(validate_chat_request(&base_request()).is_ok());
    }

    fn base_response_request() -> CreateResponseRequest {
        CreateResponseRequest {
            model: "openrouter/gpt-4o".to_string(),
            input: "hi".to_string(),
            temperature: None,
            max_output_tokens: None,
            stream: None,
            gateway: None,
        }
    }

    #[test]
    fn rejects_blank_input() {
        let mut request = base_response_request();
        request.input = "   ".to_string();
        assert!(validate_response_request(&request).is_err());
    }

    #[test]
    fn accepts_a_well_formed_response_request() {
        assert!(validate_response_request(&base_response_request()).is_ok());
    }
}
