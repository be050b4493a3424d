//! Head-of-chain step injection.
use super::document::{insert_element, Direction, FlowDocument, FlowRef};
use super::xml::{Element, Node};
use crate::error::{AugmentError, Result};
use crate::policy::validate_policy_name;

/// Prepend a `Step` referencing `policy` to `flow`'s `direction` chain.
///
/// The chain element is created when absent. Existing steps keep their
/// relative order after the new one. No check is made for an existing step
/// with the same name, so repeated calls stack duplicates.
pub fn inject_at_head(
    doc: &mut FlowDocument,
    flow: &FlowRef,
    direction: Direction,
    policy: &str,
) -> Result<()> {
    validate_policy_name(policy)?;
    let layout = doc.layout().clone();
    let (flow_element, depth) = doc.flow_mut(flow)?;

    let chain_index = match flow_element.child_index(direction.element_name()) {
        Some(index) => index,
        None => {
            let position = chain_position(flow_element, direction);
            let chain = Element::new(direction.element_name());
            insert_element(flow_element, position, chain, depth, &layout)
        }
    };
    let chain = flow_element
        .element_at_mut(chain_index)
        .ok_or_else(|| AugmentError::not_found("flow chain", direction.element_name()))?;
    // A chain holding bare text instead of steps is coerced to a step list.
    chain
        .children
        .retain(|node| !matches!(node, Node::Text(raw) if !raw.trim().is_empty()));

    let mut name = Element::new("Name");
    name.push_text(policy);
    let mut step = Element::new("Step");
    insert_element(&mut step, None, name, depth + 2, &layout);
    let head = chain.first_element_index();
    insert_element(chain, head, step, depth + 1, &layout);

    tracing::debug!(flow = %flow, %direction, policy, "injected step at head");
    Ok(())
}

/// Where a missing chain element goes: `Request` before `Response`, both
/// before the flow `Condition`.
fn chain_position(flow: &Element, direction: Direction) -> Option<usize> {
    let followers: &[&str] = match direction {
        Direction::Request => &["Response", "Condition"],
        Direction::Response => &["Condition"],
    };
    followers.iter().find_map(|name| flow.child_index(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROXY: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<ProxyEndpoint name="default">
    <PreFlow name="PreFlow">
        <Request/>
        <Response/>
    </PreFlow>
    <Flows>
        <Flow name="GetPet">
            <Request>
                <Step>
                    <Name>Verify-Key</Name>
                </Step>
                <Step>
                    <Name>Quota</Name>
                    <Condition>request.verb = "GET"</Condition>
                </Step>
            </Request>
            <Condition>(proxy.pathsuffix MatchesPath "/pets/*")</Condition>
        </Flow>
    </Flows>
    <PostFlow name="PostFlow">
        <Request/>
        <Response/>
    </PostFlow>
</ProxyEndpoint>
"#;

    fn doc() -> FlowDocument {
        FlowDocument::parse(PROXY, "default.xml").unwrap()
    }

    #[test]
    fn new_step_becomes_head_and_keeps_existing_order() {
        let mut doc = doc();
        let flow = FlowRef::from_name("GetPet");
        inject_at_head(&mut doc, &flow, Direction::Request, "FC-base-request-process").unwrap();

        let entry = doc.flow(&flow).unwrap();
        assert_eq!(
            entry.step_names(Direction::Request),
            vec!["FC-base-request-process", "Verify-Key", "Quota"]
        );
        assert_eq!(
            entry.request[2].condition.as_deref(),
            Some("request.verb = \"GET\"")
        );
    }

    #[test]
    fn creates_missing_chain_before_condition() {
        let mut doc = doc();
        let flow = FlowRef::from_name("GetPet");
        inject_at_head(&mut doc, &flow, Direction::Response, "FC-base-response-process").unwrap();

        let entry = doc.flow(&flow).unwrap();
        assert_eq!(
            entry.step_names(Direction::Response),
            vec!["FC-base-response-process"]
        );
        let text = doc.to_xml_string().unwrap();
        let response = text.find("<Response>").unwrap();
        let condition = text.find("<Condition>(proxy.pathsuffix").unwrap();
        assert!(response < condition);
    }

    #[test]
    fn fills_self_closing_chain_with_indented_step() {
        let mut doc = doc();
        inject_at_head(&mut doc, &FlowRef::PreFlow, Direction::Request, "FC-a").unwrap();
        let text = doc.to_xml_string().unwrap();
        assert!(text.contains(
            "    <PreFlow name=\"PreFlow\">\n        <Request>\n            <Step>\n                <Name>FC-a</Name>\n            </Step>\n        </Request>\n        <Response/>\n"
        ));
    }

    #[test]
    fn repeated_injection_stacks_at_head() {
        let mut doc = doc();
        inject_at_head(&mut doc, &FlowRef::PostFlow, Direction::Response, "FC-a").unwrap();
        inject_at_head(&mut doc, &FlowRef::PostFlow, Direction::Response, "FC-b").unwrap();
        inject_at_head(&mut doc, &FlowRef::PostFlow, Direction::Response, "FC-a").unwrap();
        let entry = doc.flow(&FlowRef::PostFlow).unwrap();
        assert_eq!(
            entry.step_names(Direction::Response),
            vec!["FC-a", "FC-b", "FC-a"]
        );
    }

    #[test]
    fn injection_survives_save_and_reload() {
        let mut doc = doc();
        inject_at_head(&mut doc, &FlowRef::PreFlow, Direction::Request, "FC-a").unwrap();
        inject_at_head(&mut doc, &FlowRef::from_name("GetPet"), Direction::Request, "FC-b")
            .unwrap();
        let reloaded = FlowDocument::parse(&doc.to_xml_string().unwrap(), "default.xml").unwrap();
        assert_eq!(
            reloaded.get_flow("PreFlow").unwrap().step_names(Direction::Request),
            vec!["FC-a"]
        );
        assert_eq!(
            reloaded.get_flow("GetPet").unwrap().step_names(Direction::Request),
            vec!["FC-b", "Verify-Key", "Quota"]
        );
        assert_eq!(reloaded.flow_names(), vec!["GetPet"]);
    }

    #[test]
    fn creates_missing_preflow_element() {
        let source = "<ProxyEndpoint name=\"default\">\n  <Flows/>\n</ProxyEndpoint>\n";
        let mut doc = FlowDocument::parse(source, "default.xml").unwrap();
        inject_at_head(&mut doc, &FlowRef::PreFlow, Direction::Request, "FC-a").unwrap();
        let text = doc.to_xml_string().unwrap();
        assert_eq!(
            text,
            "<ProxyEndpoint name=\"default\">\n  <PreFlow name=\"PreFlow\">\n    <Request>\n      <Step>\n        <Name>FC-a</Name>\n      </Step>\n    </Request>\n  </PreFlow>\n  <Flows/>\n</ProxyEndpoint>\n"
        );
    }

    #[test]
    fn compact_documents_stay_compact() {
        let source = "<ProxyEndpoint><PreFlow name=\"PreFlow\"><Request><Step><Name>A</Name></Step></Request></PreFlow></ProxyEndpoint>";
        let mut doc = FlowDocument::parse(source, "default.xml").unwrap();
        inject_at_head(&mut doc, &FlowRef::PreFlow, Direction::Request, "FC-a").unwrap();
        assert_eq!(
            doc.to_xml_string().unwrap(),
            "<ProxyEndpoint><PreFlow name=\"PreFlow\"><Request><Step><Name>FC-a</Name></Step><Step><Name>A</Name></Step></Request></PreFlow></ProxyEndpoint>"
        );
    }

    #[test]
    fn bare_text_chain_is_coerced_to_steps() {
        let source = "<ProxyEndpoint><PostFlow name=\"PostFlow\"><Response>junk</Response></PostFlow></ProxyEndpoint>";
        let mut doc = FlowDocument::parse(source, "default.xml").unwrap();
        inject_at_head(&mut doc, &FlowRef::PostFlow, Direction::Response, "FC-a").unwrap();
        assert_eq!(
            doc.to_xml_string().unwrap(),
            "<ProxyEndpoint><PostFlow name=\"PostFlow\"><Response><Step><Name>FC-a</Name></Step></Response></PostFlow></ProxyEndpoint>"
        );
    }

    #[test]
    fn unknown_flow_is_not_found() {
        let mut doc = doc();
        let err = inject_at_head(
            &mut doc,
            &FlowRef::from_name("DeleteWidget"),
            Direction::Request,
            "FC-a",
        )
        .unwrap_err();
        assert!(matches!(err, AugmentError::NotFound { what: "flow", .. }));
    }

    #[test]
    fn direction_parsing_rejects_unknown_values() {
        assert_eq!("Request".parse::<Direction>().unwrap(), Direction::Request);
        assert_eq!("Response".parse::<Direction>().unwrap(), Direction::Response);
        for value in ["Both", "request", "RESPONSE", " Request"] {
            let err = value.parse::<Direction>().unwrap_err();
            assert!(matches!(err, AugmentError::InvalidDirection { value: got } if got == value));
        }
    }
}
