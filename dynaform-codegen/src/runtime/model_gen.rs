use dynaform::schema::{table_env_var, Field, IntermediateRepresentation, KeyPart, Model};
use proc_macro2::TokenStream;
use quote::quote;

use crate::type_utils::{field_to_rust_type, safe_field_ident, type_ident};

/// Generate record structs and their `Model` impls for all models.
pub fn generate_models(ir: &IntermediateRepresentation) -> TokenStream {
    let mut tokens = TokenStream::new();

    // The IR keeps these sorted by name.
    for model in &ir.models {
        tokens.extend(generate_struct(model));
        tokens.extend(generate_key_builder(model));
        tokens.extend(generate_model_impl(model));
    }

    tokens
}

/// Generate the record struct for a model.
fn generate_struct(model: &Model) -> TokenStream {
    let struct_ident = type_ident(&model.type_name);
    let doc_comment = format!(
        " A `{}` record stored in table `{}`.",
        model.type_name, model.table_name
    );

    let field_tokens: Vec<_> = model.fields.iter().map(generate_field_with_attrs).collect();

    quote! {
        #[doc = #doc_comment]
        #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
        pub struct #struct_ident {
            #(#field_tokens)*
            #[serde(default)]
            pub meta: dynaform::RecordMeta,
        }
    }
}

/// Generate a struct field with appropriate serde attributes.
fn generate_field_with_attrs(field: &Field) -> TokenStream {
    let ident = safe_field_ident(&field.field_name);
    let ty = field_to_rust_type(field);

    let ident_str = ident.to_string();
    let rename_attr = if ident_str.trim_start_matches("r#") != field.field_name {
        let original = &field.field_name;
        Some(quote! { #[serde(rename = #original)] })
    } else {
        None
    };

    let serde_attrs = if field.is_list {
        quote! { #[serde(default)] }
    } else if !field.is_required {
        quote! { #[serde(default, skip_serializing_if = "Option::is_none")] }
    } else {
        quote! {}
    };

    quote! {
        #rename_attr
        #serde_attrs
        pub #ident: #ty,
    }
}

/// Fields making up the primary key, in first-use order.
pub(crate) fn key_fields(model: &Model) -> Vec<&str> {
    let mut fields: Vec<&str> = Vec::new();
    for part in model.primary_key.parts() {
        for field in &part.fields {
            if !fields.contains(&field.as_str()) {
                fields.push(field);
            }
        }
    }
    fields
}

fn prefix_tokens(part: &KeyPart) -> TokenStream {
    match &part.prefix {
        Some(prefix) => quote! { Some(#prefix) },
        None => quote! { None },
    }
}

/// Generate `key_of`, building the primary key from its fields.
fn generate_key_builder(model: &Model) -> TokenStream {
    let struct_ident = type_ident(&model.type_name);
    let params: Vec<_> = key_fields(model)
        .into_iter()
        .map(|f| {
            let ident = safe_field_ident(f);
            quote! { #ident: &(impl dynaform::wire::ToAttribute + ?Sized) }
        })
        .collect();

    let inserts: Vec<_> = model
        .primary_key
        .parts()
        .into_iter()
        .map(|part| {
            let attribute = &part.attribute_name;
            let components: Vec<_> = part.fields.iter().map(|f| safe_field_ident(f)).collect();
            if part.is_single_field {
                quote! {
                    key.insert(#attribute.to_string(), #(dynaform::wire::key_attribute(#components))*);
                }
            } else {
                let prefix = prefix_tokens(part);
                quote! {
                    key.insert(
                        #attribute.to_string(),
                        dynaform::wire::key_value(#prefix, &[#(dynaform::wire::key_attribute(#components)),*]),
                    );
                }
            }
        })
        .collect();

    let table_name = &model.table_name;
    let doc_comment = format!(" Primary key of a `{}`.", model.type_name);

    quote! {
        impl #struct_ident {
            pub const TABLE: &'static str = #table_name;

            #[doc = #doc_comment]
            pub fn key_of(#(#params),*) -> dynaform::wire::Item {
                let mut key = dynaform::wire::Item::new();
                #(#inserts)*
                key
            }
        }
    }
}

fn field_access(name: &str) -> TokenStream {
    let ident = safe_field_ident(name);
    quote! { self.#ident }
}

/// Attributes written for secondary indexes with synthetic keys.
fn generate_index_attributes(model: &Model) -> Vec<TokenStream> {
    model
        .secondary_indexes
        .iter()
        .flat_map(|index| index.parts())
        .filter(|part| !part.is_single_field)
        .map(|part| {
            let attribute = &part.attribute_name;
            let prefix = prefix_tokens(part);
            let components: Vec<_> = part.fields.iter().map(|f| field_access(f)).collect();
            quote! {
                if let Some(value) = dynaform::wire::sparse_key_value(
                    #prefix,
                    &[#(dynaform::wire::ToAttribute::to_attribute(&#components)),*],
                ) {
                    item.insert(#attribute.to_string(), value);
                }
            }
        })
        .collect()
}

fn is_ttl(model: &Model, field: &Field) -> bool {
    model
        .ttl
        .as_ref()
        .is_some_and(|ttl| ttl.field_name == field.field_name)
}

/// Statement writing one field into `item`.
fn generate_marshal_field(model: &Model, field: &Field) -> Option<TokenStream> {
    let ident = safe_field_ident(&field.field_name);
    let column = &field.column_name;

    if !field.is_storage_required() {
        return None;
    }
    if let Some(computed) = &field.computed {
        let function: syn::Path = syn::parse_str(&computed.function).ok()?;
        return Some(quote! {
            dynaform::wire::put_attribute(&mut item, #column, &#function(self));
        });
    }
    if is_ttl(model, field) {
        return Some(if field.is_required {
            quote! {
                item.insert(#column.to_string(), dynaform::wire::epoch_seconds(&self.#ident));
            }
        } else {
            quote! {
                if let Some(at) = &self.#ident {
                    item.insert(#column.to_string(), dynaform::wire::epoch_seconds(at));
                }
            }
        });
    }
    Some(quote! {
        dynaform::wire::put_attribute(&mut item, #column, &self.#ident);
    })
}

/// Initializer reading one field from `item`.
fn generate_unmarshal_field(model: &Model, field: &Field) -> TokenStream {
    let ident = safe_field_ident(&field.field_name);
    let type_name = &model.type_name;
    let columns = field.column_names_for_read();

    if !field.is_storage_required() {
        return quote! { #ident: Default::default(), };
    }
    if field.is_list {
        quote! {
            #ident: dynaform::wire::read_optional(item, #type_name, &[#(#columns),*])?.unwrap_or_default(),
        }
    } else if field.is_required {
        quote! {
            #ident: dynaform::wire::read_required(item, #type_name, &[#(#columns),*])?,
        }
    } else {
        quote! {
            #ident: dynaform::wire::read_optional(item, #type_name, &[#(#columns),*])?,
        }
    }
}

/// Statements filling virtual computed fields after a read.
fn generate_virtual_fields(model: &Model) -> Vec<TokenStream> {
    model
        .fields
        .iter()
        .filter(|f| !f.is_storage_required())
        .filter_map(|field| {
            let ident = safe_field_ident(&field.field_name);
            let computed = field.computed.as_ref()?;
            let function: syn::Path = syn::parse_str(&computed.function).ok()?;
            Some(quote! { record.#ident = #function(&record); })
        })
        .collect()
}

/// `before_create` override defaulting an unset TTL.
fn generate_ttl_default(model: &Model) -> Option<TokenStream> {
    let ttl = model.ttl.as_ref()?;
    let seconds = i64::try_from(ttl.duration_seconds?).ok()?;
    let field = model.field(&ttl.field_name)?;
    if field.is_required {
        return None;
    }
    let ident = safe_field_ident(&field.field_name);
    Some(quote! {
        fn before_create(&mut self, now: chrono::DateTime<chrono::Utc>) {
            if self.#ident.is_none() {
                self.#ident = Some(now + chrono::Duration::seconds(#seconds));
            }
        }
    })
}

/// Generate the `dynaform::Model` impl for a model.
fn generate_model_impl(model: &Model) -> TokenStream {
    let struct_ident = type_ident(&model.type_name);
    let type_name = &model.type_name;
    let table_env = table_env_var(&model.table_name);
    let partition_attribute = &model.primary_key.partition_key().attribute_name;
    let ledger = model.is_ledger;
    let consistent = model.consistent;

    let key_args: Vec<_> = key_fields(model)
        .into_iter()
        .map(|f| {
            let access = field_access(f);
            quote! { &#access }
        })
        .collect();

    let index_attributes = generate_index_attributes(model);
    let marshal_fields: Vec<_> = model
        .fields
        .iter()
        .filter_map(|f| generate_marshal_field(model, f))
        .collect();
    let unmarshal_fields: Vec<_> = model
        .fields
        .iter()
        .map(|f| generate_unmarshal_field(model, f))
        .collect();
    let virtual_fields = generate_virtual_fields(model);
    let record_binding = if virtual_fields.is_empty() {
        quote! { let record }
    } else {
        quote! { let mut record }
    };
    let ttl_default = generate_ttl_default(model);

    quote! {
        impl dynaform::Model for #struct_ident {
            const TYPE_NAME: &'static str = #type_name;
            const TABLE_ENV: &'static str = #table_env;
            const PARTITION_ATTRIBUTE: &'static str = #partition_attribute;
            const LEDGER: bool = #ledger;
            const CONSISTENT: bool = #consistent;

            fn key(&self) -> dynaform::wire::Item {
                Self::key_of(#(#key_args),*)
            }

            fn meta(&self) -> &dynaform::RecordMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut dynaform::RecordMeta {
                &mut self.meta
            }

            fn marshal(&self) -> dynaform::wire::Item {
                let mut item = Self::key_of(#(#key_args),*);
                #(#index_attributes)*
                #(#marshal_fields)*
                item
            }

            fn unmarshal(item: &dynaform::wire::Item) -> dynaform::Result<Self> {
                #record_binding = Self {
                    #(#unmarshal_fields)*
                    meta: dynaform::RecordMeta::from_item(item, #type_name)?,
                };
                #(#virtual_fields)*
                Ok(record)
            }

            #ttl_default
        }
    }
}
