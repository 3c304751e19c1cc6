//! Signature + configuration bundle → [`FunctionSchema`].
//!
//! Configuration is applied in fixed layers: layout, widgets, roles,
//! examples/whitelists, labels, then legacy per-argument blocks. A layer only
//! fills in what an earlier layer left unset. Widgets are synthesized once
//! every layer has been applied, so a configured whitelist drives the choice
//! widget the same way a literal type does.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::annotation::{Annotation, Signature};
use crate::config::{ArgTarget, FunctionConfig, LayoutItem, Role, VisibilityRule};
use crate::descriptor::{Kind, Tag, TypeDescriptor};
use crate::error::{SchemaError, SchemaResult};
use crate::resolver::Resolver;
use crate::schema::{
    ArgumentPlan, ArgumentSpec, Conditional, Const, FunctionSchema, Predicate, Property, Reveal,
    ReturnDescriptor, UiTree, WidgetGroup,
};
use crate::theme::{Theme, ThemeSet};
use crate::widget::{SHEET, UPLOAD_WIDGETS, WidgetChoice, synthesize};

/// Per-argument state while layers are applied.
struct Draft {
    descriptor: TypeDescriptor,
    default: Option<Value>,
    widget: Option<WidgetChoice>,
    role: Option<Role>,
    whitelist: Option<Vec<Value>>,
    examples: Option<Vec<Value>>,
    label: Option<String>,
    custom_layout: bool,
}

type Drafts = IndexMap<String, Draft>;

pub struct SchemaBuilder<'a> {
    resolver: &'a Resolver,
    themes: &'a ThemeSet,
}

impl<'a> SchemaBuilder<'a> {
    pub fn new(resolver: &'a Resolver, themes: &'a ThemeSet) -> Self {
        Self { resolver, themes }
    }

    pub fn build(
        &self,
        signature: &Signature,
        config: &FunctionConfig,
    ) -> SchemaResult<FunctionSchema> {
        let theme = self.themes.get(config.theme.as_deref())?;
        let mut drafts = self.seed(signature)?;
        let mut groups = Vec::new();

        apply_layout(&mut drafts, config)?;
        apply_widgets(&mut drafts, config, &mut groups)?;
        for (target, role) in &config.treat_as {
            for name in target.names() {
                set_role(draft(&mut drafts, name, "treat_as")?, name, *role)?;
            }
        }
        for (target, values) in &config.examples {
            for (name, values) in split_values(&drafts, target, values, "examples")? {
                fill(&mut draft(&mut drafts, &name, "examples")?.examples, values);
            }
        }
        for (target, values) in &config.whitelist {
            for (name, values) in split_values(&drafts, target, values, "whitelist")? {
                fill(&mut draft(&mut drafts, &name, "whitelist")?.whitelist, values);
            }
        }
        for (target, label) in &config.labels {
            for name in target.names() {
                fill(&mut draft(&mut drafts, name, "labels")?.label, label.clone());
            }
        }
        apply_argument_config(&mut drafts, config)?;

        let returns = match &signature.returns {
            Annotation::Missing => None,
            annotation => Some(self.resolver.resolve(annotation)?),
        };
        let streaming = returns.as_ref().is_some_and(|d| d.streaming);

        finalize_values(&mut drafts)?;
        let roles = finalize_roles(&drafts, streaming)?;

        let mut arguments = Vec::with_capacity(drafts.len());
        let mut properties = IndexMap::new();
        let mut plan = ArgumentPlan::default();
        for (name, draft) in drafts {
            let role = roles[&name];
            let node = argument_node(&draft, role, theme);
            if let Some(columns) = frame_columns(&draft.descriptor) {
                plan.frames.insert(name.clone(), columns);
            } else if UPLOAD_WIDGETS.contains(&node.leaf_widget()) {
                plan.uploads.push(name.clone());
            }
            match role {
                Role::Config => plan.config.push(name.clone()),
                Role::Column => plan.columns.push(name.clone()),
                Role::Cell => plan.cells.push(name.clone()),
            }

            arguments.push(ArgumentSpec {
                name: name.clone(),
                descriptor: draft.descriptor,
                role,
                widget: node.widget.clone(),
                label: draft.label.clone(),
                default: draft.default.clone(),
                examples: draft.examples.clone(),
                whitelist: draft.whitelist,
                custom_layout: draft.custom_layout,
            });
            properties.insert(
                name,
                Property {
                    node,
                    title: draft.label,
                    default: draft.default,
                    examples: draft.examples,
                    role,
                    custom_layout: draft.custom_layout,
                },
            );
        }

        let (properties, all_of) = apply_visibility(properties, &config.conditional_visible)?;

        for (argument, _) in &config.pre_fill {
            if !signature.has_param(argument) {
                return Err(SchemaError::unknown_argument(argument, "pre_fill"));
            }
        }

        let path = config.path.clone().unwrap_or_else(|| signature.name.clone());
        let id = function_id(&path);
        let schema = FunctionSchema {
            id,
            name: signature.name.clone(),
            title: config.title.clone().unwrap_or_else(|| signature.name.clone()),
            description: config.description.clone(),
            arguments,
            returns: match returns {
                Some(descriptor) => ReturnDescriptor::from_descriptor(descriptor),
                None => ReturnDescriptor::None,
            },
            ui: UiTree {
                kind: "object",
                properties,
                all_of,
                groups,
            },
            input_layout: config.input_layout.clone(),
            output_layout: config.output_layout.clone(),
            destination: config.destination,
            theme: theme.name.clone(),
            plan,
            streaming,
            secret_gated: config.secret.is_some(),
            secret: config.secret.clone(),
            rate_limit: config.rate_limit.clone(),
            pre_fill: config.pre_fill.clone(),
            figure_to_image: config.figure_to_image,
            autorun: config.autorun,
            path,
        };
        info!(function = %schema.name, id = %schema.id, path = %schema.path, "schema built");
        Ok(schema)
    }

    fn seed(&self, signature: &Signature) -> SchemaResult<Drafts> {
        signature
            .params
            .iter()
            .map(|param| {
                let descriptor = self.resolver.resolve(&param.annotation)?;
                Ok((
                    param.name.clone(),
                    Draft {
                        descriptor,
                        default: param.default.clone(),
                        widget: None,
                        role: None,
                        whitelist: None,
                        examples: None,
                        label: None,
                        custom_layout: false,
                    },
                ))
            })
            .collect()
    }
}

/// Stable id derived from the function's path.
pub fn function_id(path: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("funix:{path}").as_bytes())
}

fn draft<'d>(
    drafts: &'d mut Drafts,
    name: &str,
    source_name: &'static str,
) -> SchemaResult<&'d mut Draft> {
    drafts
        .get_mut(name)
        .ok_or_else(|| SchemaError::unknown_argument(name, source_name))
}

fn fill<T>(slot: &mut Option<T>, value: T) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

fn set_role(draft: &mut Draft, name: &str, role: Role) -> SchemaResult<()> {
    match draft.role {
        None => draft.role = Some(role),
        Some(first) if first != role && first != Role::Config && role != Role::Config => {
            return Err(SchemaError::RoleConflict {
                argument: name.to_string(),
                first,
                second: role,
            });
        }
        Some(_) => {}
    }
    Ok(())
}

fn apply_layout(drafts: &mut Drafts, config: &FunctionConfig) -> SchemaResult<()> {
    for item in config.input_layout.iter().flatten() {
        if let LayoutItem::Argument { name, .. } = item {
            draft(drafts, name, "input_layout")?.custom_layout = true;
        }
    }
    Ok(())
}

fn apply_widgets(
    drafts: &mut Drafts,
    config: &FunctionConfig,
    groups: &mut Vec<WidgetGroup>,
) -> SchemaResult<()> {
    for (target, choice) in &config.widgets {
        for name in target.names() {
            fill(&mut draft(drafts, name, "widgets")?.widget, choice.clone());
        }
        if target.is_group() {
            groups.push(WidgetGroup {
                widget: choice.top().map(|w| w.name.clone()).unwrap_or_default(),
                members: target.names().to_vec(),
            });
        }
    }
    Ok(())
}

fn apply_argument_config(drafts: &mut Drafts, config: &FunctionConfig) -> SchemaResult<()> {
    for (target, block) in &config.argument_config {
        let whitelist = match &block.whitelist {
            Some(values) => split_values(drafts, target, values, "argument_config")?,
            None => Vec::new(),
        };
        let examples = match &block.examples {
            Some(values) => split_values(drafts, target, values, "argument_config")?,
            None => Vec::new(),
        };
        for name in target.names() {
            let d = draft(drafts, name, "argument_config")?;
            if let Some(widget) = &block.widget {
                fill(&mut d.widget, widget.clone());
            }
            if let Some(role) = block.treat_as {
                set_role(d, name, role)?;
            }
            if let Some(label) = &block.label {
                fill(&mut d.label, label.clone());
            }
        }
        for (name, values) in whitelist {
            fill(&mut draft(drafts, &name, "argument_config")?.whitelist, values);
        }
        for (name, values) in examples {
            fill(&mut draft(drafts, &name, "argument_config")?.examples, values);
        }
    }
    Ok(())
}

/// Split a table value across its target: a single argument takes the whole
/// list, a group takes one list per member in declared order.
fn split_values(
    drafts: &Drafts,
    target: &ArgTarget,
    values: &Value,
    source_name: &'static str,
) -> SchemaResult<Vec<(String, Vec<Value>)>> {
    let as_list = |name: &str, value: &Value| match value {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(SchemaError::NotAList {
            argument: name.to_string(),
            source_name,
        }),
    };
    for name in target.names() {
        if !drafts.contains_key(name) {
            return Err(SchemaError::unknown_argument(name.as_str(), source_name));
        }
    }

    match target {
        ArgTarget::One(name) => Ok(vec![(name.clone(), as_list(name, values)?)]),
        ArgTarget::Group(names) => {
            let per_member = as_list(&target.describe(), values)?;
            if per_member.len() != names.len() {
                return Err(SchemaError::GroupLengthMismatch {
                    group: target.describe(),
                    expected: names.len(),
                    found: per_member.len(),
                    source_name,
                });
            }
            names
                .iter()
                .zip(per_member.iter())
                .map(|(name, value)| Ok((name.clone(), as_list(name, value)?)))
                .collect()
        }
    }
}

/// Enforce whitelist/example exclusion, then derive defaults.
fn finalize_values(drafts: &mut Drafts) -> SchemaResult<()> {
    for (name, draft) in drafts.iter_mut() {
        if let Some(whitelist) = draft.whitelist.take() {
            *whitelist_slot(&mut draft.descriptor) = Some(whitelist);
        }
        let whitelist = whitelist_slot(&mut draft.descriptor).clone();
        if whitelist.is_some() && draft.examples.is_some() {
            return Err(SchemaError::WhitelistExampleConflict {
                argument: name.clone(),
            });
        }
        draft.whitelist = whitelist;

        match &draft.default {
            Some(default) if draft.whitelist.is_none() => {
                let examples = draft.examples.get_or_insert_with(Vec::new);
                if !examples.contains(default) {
                    examples.push(default.clone());
                }
            }
            Some(_) => {}
            None if draft.descriptor.optional => draft.default = Some(Value::Null),
            None if draft.descriptor.kind == Kind::Boolean => {
                draft.default = Some(Value::Bool(false))
            }
            None => {}
        }
    }
    Ok(())
}

/// Whitelists on a list argument constrain its elements.
fn whitelist_slot(descriptor: &mut TypeDescriptor) -> &mut Option<Vec<Value>> {
    match descriptor.element {
        Some(ref mut element) if descriptor.kind == Kind::Array => &mut element.whitelist,
        _ => &mut descriptor.whitelist,
    }
}

fn finalize_roles(drafts: &Drafts, streaming: bool) -> SchemaResult<IndexMap<String, Role>> {
    let roles: IndexMap<String, Role> = drafts
        .iter()
        .map(|(name, draft)| {
            let implied = match draft.widget.as_ref().and_then(WidgetChoice::top) {
                Some(widget) if widget.name == SHEET => Role::Column,
                _ => Role::Config,
            };
            (name.clone(), draft.role.unwrap_or(implied))
        })
        .collect();

    let first = |role: Role| roles.iter().find(|(_, r)| **r == role).map(|(n, _)| n.clone());
    if let (Some(column), Some(cell)) = (first(Role::Column), first(Role::Cell)) {
        return Err(SchemaError::MixedSheetRoles { column, cell });
    }
    if streaming {
        let cells: Vec<&str> = roles
            .iter()
            .filter(|(_, r)| **r == Role::Cell)
            .map(|(n, _)| n.as_str())
            .collect();
        if !cells.is_empty() {
            return Err(SchemaError::StreamingCells(cells.join(", ")));
        }
    }
    Ok(roles)
}

fn frame_columns(descriptor: &TypeDescriptor) -> Option<Vec<String>> {
    if descriptor.tag != Tag::Dataframe {
        return None;
    }
    descriptor
        .fields
        .as_ref()
        .map(|fields| fields.keys().cloned().collect())
}

fn argument_node(draft: &Draft, role: Role, theme: &Theme) -> crate::widget::UiNode {
    let explicit = draft.widget.as_ref();
    let has_explicit_top = explicit.and_then(WidgetChoice::top).is_some();

    let frame_fields = draft
        .descriptor
        .fields
        .as_ref()
        .filter(|_| draft.descriptor.tag == Tag::Dataframe);
    if let Some(fields) = frame_fields {
        // Frames are edited as a sheet with one array column per field.
        let mut view = draft.descriptor.clone();
        view.fields = Some(
            fields
                .iter()
                .map(|(name, column)| (name.clone(), TypeDescriptor::array(Some(column.clone()))))
                .collect(),
        );
        let mut node = synthesize(&view, explicit, theme, 0);
        if !has_explicit_top {
            node.widget = SHEET.to_string();
        }
        return node;
    }

    if role == Role::Cell {
        let column = TypeDescriptor::array(Some(draft.descriptor.clone()));
        let mut node = synthesize(&column, explicit, theme, 0);
        if !has_explicit_top {
            node.widget = SHEET.to_string();
        }
        return node;
    }

    let node = synthesize(&draft.descriptor, explicit, theme, 0);
    debug!(widget = %node.widget, type_name = %draft.descriptor.type_name, "widget synthesized");
    node
}

/// Two passes: collect every rule's removals, then rebuild the visible set
/// and the conditional blocks from the untouched input.
fn apply_visibility(
    properties: IndexMap<String, Property>,
    rules: &[VisibilityRule],
) -> SchemaResult<(IndexMap<String, Property>, Vec<Conditional>)> {
    let mut removed = HashSet::new();
    for rule in rules {
        for name in rule.when.keys() {
            if !properties.contains_key(name) {
                return Err(SchemaError::unknown_argument(name.as_str(), "conditional_visible"));
            }
        }
        for name in &rule.show {
            if !properties.contains_key(name) {
                return Err(SchemaError::unknown_argument(name.as_str(), "conditional_visible"));
            }
            if !removed.insert(name.clone()) {
                return Err(SchemaError::DuplicateConditionalTarget {
                    argument: name.clone(),
                });
            }
        }
    }

    let conditionals = rules
        .iter()
        .map(|rule| Conditional {
            when: Predicate {
                properties: rule
                    .when
                    .iter()
                    .map(|(name, value)| (name.clone(), Const { value: value.clone() }))
                    .collect(),
            },
            reveal: Reveal {
                properties: properties
                    .iter()
                    .filter(|(name, _)| rule.show.contains(name))
                    .map(|(name, property)| (name.clone(), property.clone()))
                    .collect(),
            },
        })
        .collect();
    let visible = properties
        .into_iter()
        .filter(|(name, _)| !removed.contains(name))
        .collect();
    Ok((visible, conditionals))
}
