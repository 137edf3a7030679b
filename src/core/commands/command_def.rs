// src/core/commands/command_def.rs

//! The `define_commands!` macro. One table entry per command generates the enum
//! variant, its dispatch arms and its row in the command table.

macro_rules! define_commands {
    ($( ($variant:ident, $module:ident, $name:literal, $arity:expr, $flags:expr) ),* $(,)?) => {
        /// A fully parsed command, ready to execute.
        #[derive(Debug, Clone)]
        pub enum Command {
            $( $variant($module::$variant), )*
        }

        impl Command {
            /// The lowercase name the command was registered under.
            pub fn name(&self) -> &'static str {
                match self {
                    $( Command::$variant(_) => $name, )*
                }
            }
        }

        #[async_trait]
        impl CommandExt for Command {
            fn get_flags(&self) -> CommandFlags {
                match self {
                    $( Command::$variant(_) => $flags, )*
                }
            }

            async fn execute<'a>(
                &self,
                ctx: &mut ExecutionContext<'a>,
            ) -> Result<RespValue, QdbError> {
                match self {
                    $( Command::$variant(cmd) => cmd.execute(ctx).await, )*
                }
            }
        }

        fn build_command_table() -> HashMap<&'static str, CommandSpec> {
            let mut table = HashMap::new();
            $(
                table.insert(
                    $name,
                    CommandSpec {
                        name: $name,
                        arity: $arity,
                        flags: $flags,
                        parse: |args| {
                            Ok(Command::$variant(
                                <$module::$variant as ParseCommand>::parse(args)?,
                            ))
                        },
                    },
                );
            )*
            table
        }
    };
}
